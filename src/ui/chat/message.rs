//! Chat log lines and their display components

use dioxus::prelude::*;
use std::time::Duration;

/// Interval between frames of the thinking animation
pub const THINKING_TICK: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LineKind {
    /// Status notices such as model loading
    System,
    User,
    Assistant,
}

/// One entry of the chat log
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChatLine {
    pub kind: LineKind,
    pub text: String,
}

impl ChatLine {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            kind: LineKind::System,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            kind: LineKind::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Assistant,
            text: text.into(),
        }
    }

    /// Speaker label shown before the text
    pub fn label(&self) -> Option<&'static str> {
        match self.kind {
            LineKind::System => None,
            LineKind::User => Some("You:"),
            LineKind::Assistant => Some("Assistant:"),
        }
    }
}

/// `Thinking` followed by 0 to 3 dots
pub fn thinking_text(tick: usize) -> String {
    format!("Thinking{}", ".".repeat(tick % 4))
}

#[component]
pub fn MessageLine(line: ChatLine) -> Element {
    let class = match line.kind {
        LineKind::System => "system-line",
        LineKind::User => "user-line",
        LineKind::Assistant => "assistant-line",
    };

    rsx! {
        div {
            class: "line {class}",
            if let Some(label) = line.label() {
                b { "{label} " }
            }
            span { class: "line-text", "{line.text}" }
        }
    }
}

/// Animated placeholder for the reply being generated
#[component]
pub fn ThinkingLine() -> Element {
    let mut tick = use_signal(|| 0usize);

    use_future(move || async move {
        loop {
            tokio::time::sleep(THINKING_TICK).await;
            tick += 1;
        }
    });

    let text = thinking_text(tick());

    rsx! {
        div {
            class: "line assistant-line thinking",
            b { "Assistant: " }
            span { "{text}" }
        }
    }
}
