//! UI components for localchat
//!
//! This module contains all user interface components built with Dioxus.

pub mod chat;
pub mod components;
pub mod settings;

use crate::app::AppState;
use crate::service::ModelState;
use chat::ChatView;
use components::error_dialog::ErrorDialog;
use components::loading::Spinner;
use dioxus::prelude::*;
use settings::SettingsDialog;

/// Top bar, chat area and the modal dialogs
#[component]
pub fn Layout() -> Element {
    let app_state = use_context::<AppState>();
    let mut show_settings = use_signal(|| false);

    let config = app_state.config.read().clone();
    let model_state = app_state.model_state.read().clone();
    let busy = *app_state.is_generating.read() || model_state == ModelState::Loading;

    rsx! {
        div {
            class: "app-shell",

            header {
                class: "top-bar",
                div {
                    class: "model-badge",
                    match model_state {
                        ModelState::Loading => rsx! { Spinner { size: 12 } },
                        ModelState::Loaded(_) => rsx! { span { class: "status-dot ready" } },
                        ModelState::Error(_) => rsx! { span { class: "status-dot failed" } },
                        ModelState::NotLoaded => rsx! { span { class: "status-dot" } },
                    }
                    span { class: "model-name", "{config.model_id}" }
                    span { class: "precision-tag", "{config.precision}" }
                }
                button {
                    class: "ghost-button",
                    disabled: busy,
                    title: "Settings",
                    onclick: move |_| show_settings.set(true),
                    "Settings"
                }
            }

            ChatView {}

            if show_settings() {
                SettingsDialog { on_close: move |_| show_settings.set(false) }
            }

            ErrorDialog {}
        }
    }
}
