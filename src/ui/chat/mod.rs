//! Chat interface components
//!
//! Contains the chat log, the thinking animation and the input row. Replies
//! are generated through the shared chat service and shown once complete.

pub mod input;
pub mod message;

use crate::app::AppState;
use crate::inference::engine::{FinishReason, GenerationOverrides};
use crate::inference::streaming::StreamToken;
use crate::types::message::Turn;
use dioxus::prelude::*;
use input::ChatInput;
use message::{ChatLine, MessageLine, ThinkingLine};
use std::sync::atomic::Ordering;

/// How a generation ended, as seen by the chat view
enum Outcome {
    Finished(FinishReason),
    Failed(String),
}

/// Chat line and history turn for a finished reply.
///
/// Only the displayed line is trimmed; history keeps the text as generated.
fn finish_reply(user: String, reply: String) -> (ChatLine, Turn) {
    (ChatLine::assistant(reply.trim()), Turn::new(user, reply))
}

#[component]
pub fn ChatView() -> Element {
    let app_state = use_context::<AppState>();

    let handle_send = {
        let app_state = app_state.clone();
        move |text: String| {
            let mut state = app_state.clone();
            if *state.is_generating.peek() || !state.is_ready() {
                return;
            }

            state.lines.write().push(ChatLine::user(text.clone()));
            state.is_generating.set(true);

            spawn(async move {
                let prompt = state.service.prompt(state.history.peek().clone(), text.clone());
                let mut stream = match state.service.stream(prompt, &GenerationOverrides::default()) {
                    Ok(stream) => stream,
                    Err(e) => {
                        state.is_generating.set(false);
                        state.error.set(Some(e.to_string()));
                        return;
                    }
                };
                state.stop_signal.set(Some(stream.stop_handle()));

                let mut reply = String::new();
                let outcome = loop {
                    let Some(token) = stream.next().await else {
                        break Outcome::Failed("Generation ended unexpectedly".to_string());
                    };
                    match token {
                        StreamToken::Token(piece) => reply.push_str(&piece),
                        StreamToken::Done(stats) => break Outcome::Finished(stats.finish_reason),
                        StreamToken::Error(e) => break Outcome::Failed(e.to_string()),
                    }
                };

                state.stop_signal.set(None);
                state.is_generating.set(false);

                match outcome {
                    Outcome::Finished(reason) => {
                        tracing::debug!("Reply finished ({})", reason.as_str());
                        let (line, turn) = finish_reply(text, reply);
                        state.lines.write().push(line);
                        state.history.write().push(turn);
                    }
                    Outcome::Failed(message) => {
                        tracing::error!("Generation failed: {}", message);
                        state.error.set(Some(message));
                    }
                }
            });
        }
    };

    let handle_stop = {
        let app_state = app_state.clone();
        move |_: ()| {
            if let Some(stop) = app_state.stop_signal.peek().as_ref() {
                stop.store(true, Ordering::Relaxed);
            }
        }
    };

    let is_generating = *app_state.is_generating.read();
    let ready = app_state.is_ready();

    rsx! {
        div {
            class: "chat-view",

            div {
                class: "chat-log",
                for (idx, line) in app_state.lines.read().iter().enumerate() {
                    MessageLine { key: "{idx}", line: line.clone() }
                }
                if is_generating {
                    ThinkingLine {}
                }
            }

            ChatInput {
                on_send: handle_send,
                on_stop: handle_stop,
                is_generating,
                ready,
            }
        }
    }
}
