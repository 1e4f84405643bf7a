//! Shared chat service
//!
//! One model slot used by both the desktop window and the HTTP shim. The
//! service owns the active configuration, loads and reloads the model, and
//! starts generations against whatever model is currently loaded.

use crate::inference::engine::{
    EngineError, GenerationOverrides, GenerationParams, LlamaLoader, ModelLoader, TextGenerator,
};
use crate::inference::prompt::ChatPrompt;
use crate::inference::streaming::{spawn_generation, Completion, GenerationStream};
use crate::types::config::{ChatConfig, Precision};
use crate::types::message::Turn;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Represents the current state of the model
#[derive(Clone, PartialEq, Debug)]
pub enum ModelState {
    NotLoaded,
    Loading,
    Loaded(String),
    Error(String),
}

pub struct ChatService {
    config: RwLock<ChatConfig>,
    state: RwLock<ModelState>,
    generator: RwLock<Option<Arc<dyn TextGenerator>>>,
    loader: Arc<dyn ModelLoader>,
    /// Serializes loads; callers arriving mid-load wait for its result
    load_lock: tokio::sync::Mutex<()>,
    /// Number of load attempts finished so far
    load_attempts: AtomicU64,
}

impl ChatService {
    /// Service backed by llama.cpp
    pub fn new(config: ChatConfig) -> Self {
        Self::with_loader(config, Arc::new(LlamaLoader))
    }

    pub fn with_loader(config: ChatConfig, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            config: RwLock::new(config),
            state: RwLock::new(ModelState::NotLoaded),
            generator: RwLock::new(None),
            loader,
            load_lock: tokio::sync::Mutex::new(()),
            load_attempts: AtomicU64::new(0),
        }
    }

    /// Snapshot of the active configuration
    pub fn config(&self) -> ChatConfig {
        self.config.read().clone()
    }

    pub fn state(&self) -> ModelState {
        self.state.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.generator.read().is_some()
    }

    /// Load the configured model unless it is already loaded.
    ///
    /// A caller that waited on another load takes that load's outcome, failed
    /// or not, instead of starting a new one.
    pub async fn ensure_loaded(&self) -> Result<(), EngineError> {
        let seen = self.load_attempts.load(Ordering::SeqCst);
        let _guard = self.load_lock.lock().await;
        let wanted = self.config.read().model_id.clone();
        if self.is_ready() && self.state() == ModelState::Loaded(wanted) {
            return Ok(());
        }
        if self.load_attempts.load(Ordering::SeqCst) != seen {
            if let ModelState::Error(message) = self.state() {
                return Err(EngineError::LoadFailed(message));
            }
        }
        self.load_current().await
    }

    /// Switch to another model and load it.
    ///
    /// The previous model is released before the new one loads; on failure no
    /// model is loaded.
    pub async fn reload(&self, model_id: &str, precision: Precision) -> Result<(), EngineError> {
        let _guard = self.load_lock.lock().await;
        {
            let mut config = self.config.write();
            *config = config.with_model(model_id, precision);
        }
        self.generator.write().take();
        self.load_current().await
    }

    async fn load_current(&self) -> Result<(), EngineError> {
        let config = self.config();
        *self.state.write() = ModelState::Loading;
        tracing::info!("Loading model: {} ({})", config.model_id, config.precision);

        let result = self.loader.load(&config).await;
        self.load_attempts.fetch_add(1, Ordering::SeqCst);
        match result {
            Ok(generator) => {
                *self.generator.write() = Some(generator);
                *self.state.write() = ModelState::Loaded(config.model_id.clone());
                tracing::info!("Model ready: {}", config.model_id);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to load {}: {}", config.model_id, e);
                self.generator.write().take();
                *self.state.write() = ModelState::Error(e.to_string());
                Err(e)
            }
        }
    }

    /// Prompt for `user` using the configured system prompt.
    pub fn prompt(&self, history: Vec<Turn>, user: impl Into<String>) -> ChatPrompt {
        ChatPrompt::new(self.config.read().system_prompt.clone(), history, user)
    }

    /// Start a streaming generation against the loaded model.
    pub fn stream(
        &self,
        prompt: ChatPrompt,
        overrides: &GenerationOverrides,
    ) -> Result<GenerationStream, EngineError> {
        let generator = self.generator.read().clone().ok_or(EngineError::NotLoaded)?;
        let params = GenerationParams::resolve(&self.config.read(), overrides);
        Ok(spawn_generation(generator, prompt, params))
    }

    /// Generate a full reply.
    pub async fn complete(
        &self,
        prompt: ChatPrompt,
        overrides: &GenerationOverrides,
    ) -> Result<Completion, EngineError> {
        self.stream(prompt, overrides)?.collect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::engine::{FinishReason, GenerationStats};
    use async_trait::async_trait;
    use std::ops::ControlFlow;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Replies with the model id followed by the user message.
    struct Echo {
        model_id: String,
    }

    impl TextGenerator for Echo {
        fn generate(
            &self,
            prompt: &ChatPrompt,
            params: &GenerationParams,
            sink: &mut dyn FnMut(&str) -> ControlFlow<()>,
        ) -> Result<GenerationStats, EngineError> {
            let _ = sink(&format!("[{}] ", self.model_id));
            let _ = sink(&prompt.user);
            Ok(GenerationStats {
                prompt_tokens: prompt.history.len(),
                completion_tokens: params.max_new_tokens as usize,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl ModelLoader for CountingLoader {
        async fn load(&self, config: &ChatConfig) -> Result<Arc<dyn TextGenerator>, EngineError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if config.model_id == "broken/model" {
                return Err(EngineError::ModelLoad("corrupt weights".to_string()));
            }
            Ok(Arc::new(Echo {
                model_id: config.model_id.clone(),
            }))
        }
    }

    fn service() -> (Arc<ChatService>, Arc<CountingLoader>) {
        let loader = Arc::new(CountingLoader::default());
        let service = ChatService::with_loader(ChatConfig::default(), loader.clone());
        (Arc::new(service), loader)
    }

    #[tokio::test]
    async fn test_stream_before_load_is_not_loaded() {
        let (service, _) = service();
        assert_eq!(service.state(), ModelState::NotLoaded);
        assert!(!service.is_ready());
        let prompt = service.prompt(vec![], "hi");
        assert!(matches!(
            service.stream(prompt, &GenerationOverrides::default()),
            Err(EngineError::NotLoaded)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_load() {
        let (service, loader) = service();
        let (a, b) = tokio::join!(service.ensure_loaded(), service.ensure_loaded());
        a.unwrap();
        b.unwrap();
        service.ensure_loaded().await.unwrap();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(service.is_ready());
        assert_eq!(
            service.state(),
            ModelState::Loaded(ChatConfig::default().model_id)
        );
    }

    #[tokio::test]
    async fn test_complete_uses_config_defaults() {
        let (service, _) = service();
        service.ensure_loaded().await.unwrap();

        let prompt = service.prompt(vec![Turn::new("a", "b")], "hello");
        assert_eq!(prompt.system, "You are a helpful assistant.");

        let completion = service
            .complete(prompt, &GenerationOverrides::default())
            .await
            .unwrap();
        assert!(completion.text.ends_with("hello"));
        assert_eq!(completion.stats.prompt_tokens, 1);
        assert_eq!(completion.stats.completion_tokens, 256);
    }

    #[tokio::test]
    async fn test_concurrent_failed_load_runs_once() {
        let loader = Arc::new(CountingLoader::default());
        let config = ChatConfig::default().with_model("broken/model", Precision::Auto);
        let service = ChatService::with_loader(config, loader.clone());

        let (a, b) = tokio::join!(service.ensure_loaded(), service.ensure_loaded());
        assert!(a.unwrap_err().to_string().contains("corrupt weights"));
        assert!(b.unwrap_err().to_string().contains("corrupt weights"));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

        // A later call is a fresh attempt
        assert!(service.ensure_loaded().await.is_err());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reload_switches_model() {
        let (service, loader) = service();
        service.ensure_loaded().await.unwrap();
        service.reload("me/other-GGUF", Precision::Fp16).await.unwrap();

        let config = service.config();
        assert_eq!(config.model_id, "me/other-GGUF");
        assert_eq!(config.precision, Precision::Fp16);
        assert_eq!(service.state(), ModelState::Loaded("me/other-GGUF".into()));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);

        let completion = service
            .complete(service.prompt(vec![], "x"), &GenerationOverrides::default())
            .await
            .unwrap();
        assert_eq!(completion.text, "[me/other-GGUF] x");
    }

    #[tokio::test]
    async fn test_failed_reload_leaves_no_model() {
        let (service, _) = service();
        service.ensure_loaded().await.unwrap();

        let err = service.reload("broken/model", Precision::Auto).await.unwrap_err();
        assert!(err.to_string().contains("corrupt weights"));
        assert!(!service.is_ready());
        assert!(matches!(service.state(), ModelState::Error(msg) if msg.contains("corrupt")));
        assert!(matches!(
            service.complete(service.prompt(vec![], "x"), &GenerationOverrides::default()).await,
            Err(EngineError::NotLoaded)
        ));
    }
}
