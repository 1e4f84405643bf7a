//! Modal error dialog
//!
//! Shown whenever `AppState::error` holds a message; closing it clears the message.

use crate::app::AppState;
use dioxus::prelude::*;

#[component]
pub fn ErrorDialog() -> Element {
    let app_state = use_context::<AppState>();
    let mut error = app_state.error;

    let Some(message) = error.read().clone() else {
        return rsx! {};
    };

    rsx! {
        div {
            class: "backdrop",

            div {
                class: "dialog",
                role: "alertdialog",

                div {
                    class: "dialog-header",
                    div {
                        class: "dialog-icon error",
                        svg {
                            width: "20",
                            height: "20",
                            view_box: "0 0 24 24",
                            fill: "none",
                            stroke: "currentColor",
                            stroke_width: "2",
                            stroke_linecap: "round",
                            stroke_linejoin: "round",
                            path { d: "M10.29 3.86L1.82 18a2 2 0 0 0 1.71 3h16.94a2 2 0 0 0 1.71-3L13.71 3.86a2 2 0 0 0-3.42 0z" }
                            line { x1: "12", y1: "9", x2: "12", y2: "13" }
                            line { x1: "12", y1: "17", x2: "12.01", y2: "17" }
                        }
                    }
                    h2 { "Error" }
                }

                pre { class: "dialog-body error-text", "{message}" }

                div {
                    class: "dialog-actions",
                    button {
                        class: "primary-button",
                        onclick: move |_| error.set(None),
                        "OK"
                    }
                }
            }
        }
    }
}
