//! Root Dioxus application component
//!
//! This module contains the main App component that serves as the root of the UI tree.

use crate::service::{ChatService, ModelState};
use crate::types::config::{ChatConfig, Precision};
use crate::types::message::History;
use crate::ui::chat::message::ChatLine;
use crate::ui::Layout;
use dioxus::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub const WINDOW_WIDTH: f64 = 900.0;
pub const WINDOW_HEIGHT: f64 = 700.0;

/// Handed to the window at launch
#[derive(Clone)]
pub struct LaunchContext {
    pub service: Arc<ChatService>,
    /// `.env` file updated by the settings dialog
    pub env_path: PathBuf,
    /// Address of the HTTP shim when it runs alongside the window
    pub api_addr: Option<String>,
}

/// Window title for the given model selection
pub fn window_title(model_id: &str, precision: Precision, api_addr: Option<&str>) -> String {
    let title = format!("HF Local Chat — {model_id} [{precision}]");
    match api_addr {
        Some(addr) => format!("{title} — API on {addr}"),
        None => title,
    }
}

/// Global application state shared across components
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
    pub env_path: PathBuf,
    pub api_addr: Option<String>,
    pub config: Signal<ChatConfig>,
    pub model_state: Signal<ModelState>,
    /// Chat log shown in the window
    pub lines: Signal<Vec<ChatLine>>,
    /// Completed turns fed back into each prompt
    pub history: Signal<History>,
    pub is_generating: Signal<bool>,
    /// Stop flag of the running generation
    pub stop_signal: Signal<Option<Arc<AtomicBool>>>,
    /// Message shown in the modal error dialog
    pub error: Signal<Option<String>>,
}

impl AppState {
    pub fn new(launch: LaunchContext) -> Self {
        tracing::info!("AppState initialized");
        let config = launch.service.config();
        Self {
            service: launch.service,
            env_path: launch.env_path,
            api_addr: launch.api_addr,
            config: Signal::new(config),
            model_state: Signal::new(ModelState::NotLoaded),
            lines: Signal::new(Vec::new()),
            history: Signal::new(Vec::new()),
            is_generating: Signal::new(false),
            stop_signal: Signal::new(None),
            error: Signal::new(None),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.model_state.read(), ModelState::Loaded(_))
    }

    /// Load a model in the background, reporting progress in the chat log.
    ///
    /// `switch_to` replaces the current model; `None` loads the configured one.
    pub fn start_loading(&self, announcement: String, switch_to: Option<(String, Precision)>) {
        let mut state = self.clone();
        state.lines.write().push(ChatLine::system(announcement));
        state.model_state.set(ModelState::Loading);

        spawn(async move {
            let result = match switch_to {
                Some((model_id, precision)) => state.service.reload(&model_id, precision).await,
                None => state.service.ensure_loaded().await,
            };
            match result {
                Ok(()) => {
                    state.lines.write().push(ChatLine::system("Model ready."));
                    state.model_state.set(state.service.state());
                }
                Err(e) => {
                    state.model_state.set(ModelState::Error(e.to_string()));
                    state.error.set(Some(e.to_string()));
                }
            }
        });
    }
}

#[component]
pub fn App() -> Element {
    let launch = use_context::<LaunchContext>();
    let app_state = use_context_provider(|| AppState::new(launch));

    let window = dioxus::desktop::use_window();
    let config = app_state.config;
    let api_addr = app_state.api_addr.clone();
    use_effect(move || {
        let config = config.read();
        window.set_title(&window_title(
            &config.model_id,
            config.precision,
            api_addr.as_deref(),
        ));
    });

    {
        let state = app_state.clone();
        use_effect(move || {
            let model_id = state.config.peek().model_id.clone();
            state.start_loading(format!("Loading model: {model_id} ..."), None);
        });
    }

    rsx! {
        style { {include_str!("../assets/main.css")} }
        Layout {}
    }
}
