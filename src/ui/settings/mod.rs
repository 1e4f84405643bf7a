//! Settings dialog
//!
//! Picks the model and precision. Accepting writes the choice to `.env`,
//! updates the window title and reloads the model in the background.

use crate::app::AppState;
use crate::storage::env_file::save_env;
use crate::types::config::Precision;
use dioxus::prelude::*;

/// (label, Hugging Face repository) pairs offered in the model list
pub const MODEL_PRESETS: [(&str, &str); 3] = [
    ("Phi-3.5-mini-instruct", "bartowski/Phi-3.5-mini-instruct-GGUF"),
    ("Qwen2.5-3B-Instruct", "Qwen/Qwen2.5-3B-Instruct-GGUF"),
    ("Mistral-7B-Instruct-v0.3", "bartowski/Mistral-7B-Instruct-v0.3-GGUF"),
];

/// Entries of the model list; the current model comes first when it is not a preset.
pub fn model_options(current: &str) -> Vec<(String, String)> {
    let mut options: Vec<(String, String)> = MODEL_PRESETS
        .iter()
        .map(|(label, repo)| (label.to_string(), repo.to_string()))
        .collect();
    if !options.iter().any(|(_, repo)| repo == current) {
        options.insert(0, (current.to_string(), current.to_string()));
    }
    options
}

#[component]
pub fn SettingsDialog(on_close: EventHandler<()>) -> Element {
    let app_state = use_context::<AppState>();
    let current = app_state.config.read().clone();

    let mut model_id = use_signal(|| current.model_id.clone());
    let mut precision = use_signal(|| current.precision);
    let options = model_options(&current.model_id);

    let handle_ok = {
        let app_state = app_state.clone();
        move |_: MouseEvent| {
            let mut state = app_state.clone();
            let model_id = model_id();
            let precision = precision();

            if let Err(e) = save_env(&state.env_path, &model_id, precision) {
                tracing::error!("Failed to save {}: {}", state.env_path.display(), e);
                state.error.set(Some(format!("Could not save settings: {e}")));
            }

            let updated = state.config.peek().with_model(model_id.clone(), precision);
            state.config.set(updated);
            state.start_loading(
                format!("Reloading model: {model_id} ({precision}) ..."),
                Some((model_id, precision)),
            );
            on_close.call(());
        }
    };

    rsx! {
        div {
            class: "backdrop",
            onclick: move |_| on_close.call(()),

            div {
                class: "dialog",
                onclick: move |e| e.stop_propagation(),

                div {
                    class: "dialog-header",
                    h2 { "Settings" }
                }

                div {
                    class: "dialog-body form",

                    label {
                        r#for: "model-select",
                        "Model:"
                    }
                    select {
                        id: "model-select",
                        value: "{model_id}",
                        onchange: move |evt| model_id.set(evt.value()),
                        for (label, repo) in options {
                            option {
                                value: "{repo}",
                                selected: repo == model_id(),
                                "{label}"
                            }
                        }
                    }

                    label {
                        r#for: "precision-select",
                        "Precision:"
                    }
                    select {
                        id: "precision-select",
                        value: "{precision}",
                        onchange: move |evt| {
                            match evt.value().parse::<Precision>() {
                                Ok(p) => precision.set(p),
                                Err(e) => tracing::warn!("{}", e),
                            }
                        },
                        for p in Precision::ALL {
                            option {
                                value: "{p}",
                                selected: p == precision(),
                                "{p}"
                            }
                        }
                    }
                }

                div {
                    class: "dialog-actions",
                    button {
                        class: "ghost-button",
                        onclick: move |_| on_close.call(()),
                        "Cancel"
                    }
                    button {
                        class: "primary-button",
                        onclick: handle_ok,
                        "OK"
                    }
                }
            }
        }
    }
}
