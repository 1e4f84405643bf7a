//! Chat input with Send and Stop buttons

use dioxus::prelude::*;

/// Rows the textarea needs for `text`, between 1 and 6
fn compute_rows(text: &str) -> usize {
    // Roughly 80 characters fit on one visual line
    let wrapped: usize = text
        .lines()
        .map(|line| line.chars().count().saturating_sub(1) / 80)
        .sum();
    let newlines = text.matches('\n').count();
    (newlines + wrapped + 1).clamp(1, 6)
}

/// Whether a message can be sent right now
fn can_send(text: &str, is_generating: bool, ready: bool) -> bool {
    ready && !is_generating && !text.trim().is_empty()
}

#[component]
pub fn ChatInput(
    on_send: EventHandler<String>,
    on_stop: EventHandler<()>,
    is_generating: bool,
    /// A model is loaded
    ready: bool,
) -> Element {
    let mut text = use_signal(String::new);

    let mut submit = move || {
        if can_send(&text(), is_generating, ready) {
            on_send.call(text().trim().to_string());
            text.set(String::new());
        }
    };

    let handle_keydown = move |evt: KeyboardEvent| {
        if evt.key() == Key::Escape && is_generating {
            on_stop.call(());
        } else if evt.key() == Key::Enter && !evt.modifiers().contains(Modifiers::SHIFT) {
            evt.prevent_default();
            submit();
        }
    };

    let send_enabled = can_send(&text(), is_generating, ready);
    let rows = compute_rows(&text());

    rsx! {
        div {
            class: "input-row",

            textarea {
                class: "chat-input",
                placeholder: "Type a message...",
                value: "{text}",
                rows: "{rows}",
                readonly: is_generating,
                oninput: move |evt| text.set(evt.value()),
                onkeydown: handle_keydown,
            }

            if is_generating {
                button {
                    class: "stop-button",
                    title: "Stop (Esc)",
                    onclick: move |_| on_stop.call(()),
                    "Stop"
                }
            } else {
                button {
                    class: "primary-button",
                    title: "Send (Enter)",
                    disabled: !send_enabled,
                    onclick: move |_| submit(),
                    "Send"
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_rows() {
        assert_eq!(compute_rows(""), 1);
        assert_eq!(compute_rows("one line"), 1);
        assert_eq!(compute_rows("a\nb\nc"), 3);
        assert_eq!(compute_rows(&"x".repeat(170)), 3);
        assert_eq!(compute_rows(&"\n".repeat(20)), 6);
    }

    #[test]
    fn test_can_send() {
        assert!(can_send("hello", false, true));
        assert!(!can_send("   \n", false, true));
        assert!(!can_send("hello", true, true));
        assert!(!can_send("hello", false, false));
    }
}
