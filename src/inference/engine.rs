//! llama.cpp backed text generation
//!
//! `LlamaEngine` owns one loaded GGUF model. Each generation call creates a
//! fresh context, feeds the prompt and samples until an end-of-generation
//! token, the token budget, or a stop request from the sink.

use crate::inference::model::{validate_gguf, GgufMetadata, ModelError};
use crate::inference::prompt::ChatPrompt;
use crate::inference::streaming::Utf8Accumulator;
use crate::storage::{huggingface, StorageError};
use crate::types::config::{ChatConfig, DeviceMap};
use async_trait::async_trait;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Tokens fed to `decode` per prefill batch
const PREFILL_BATCH_SIZE: usize = 512;

/// Layer count meaning "offload everything"
const ALL_LAYERS: u32 = 999;

/// llama.cpp picks a random seed for this value
pub const RANDOM_SEED: u32 = u32::MAX;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to initialize llama.cpp backend: {0}")]
    BackendInit(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    /// Outcome of a load another caller ran
    #[error("{0}")]
    LoadFailed(String),

    #[error(transparent)]
    InvalidModel(#[from] ModelError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Model is not loaded")]
    NotLoaded,

    #[error("Prompt is {prompt_tokens} tokens but the context only holds {context_size}")]
    PromptTooLong {
        prompt_tokens: usize,
        context_size: u32,
    },

    #[error("Generation failed: {0}")]
    Inference(String),
}

/// Sampling settings for one request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub seed: u32,
}

/// Per-request values that replace the configured defaults
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOverrides {
    pub max_new_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

impl GenerationParams {
    /// Merge request overrides into the configured defaults.
    ///
    /// A zero token budget counts as unset.
    pub fn resolve(config: &ChatConfig, overrides: &GenerationOverrides) -> Self {
        let max_new_tokens = overrides
            .max_new_tokens
            .filter(|&n| n > 0)
            .unwrap_or(config.max_new_tokens)
            .max(1);
        let temperature = overrides.temperature.unwrap_or(config.temperature).max(0.0);
        let top_p = overrides.top_p.unwrap_or(config.top_p);
        let top_p = if top_p > 0.0 { top_p.min(1.0) } else { 1.0 };

        Self {
            max_new_tokens,
            temperature,
            top_p,
            seed: RANDOM_SEED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// End-of-generation token
    Stop,
    /// Token budget or context exhausted
    Length,
    /// The consumer asked to stop
    Cancelled,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GenerationStats {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub finish_reason: FinishReason,
}

/// A loaded model able to produce text for a chat prompt.
///
/// `sink` receives decoded text in generation order; returning
/// `ControlFlow::Break` stops generation early.
pub trait TextGenerator: Send + Sync {
    fn generate(
        &self,
        prompt: &ChatPrompt,
        params: &GenerationParams,
        sink: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<GenerationStats, EngineError>;
}

/// Turns a [`ChatConfig`] into a ready [`TextGenerator`].
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, config: &ChatConfig) -> Result<Arc<dyn TextGenerator>, EngineError>;
}

/// Information about a loaded model
#[derive(Debug, Clone)]
pub struct LoadedModelInfo {
    pub model_id: String,
    pub path: PathBuf,
    pub gpu_layers: u32,
    pub context_size: u32,
    pub has_chat_template: bool,
    pub gguf: GgufMetadata,
}

static BACKEND: OnceCell<Arc<LlamaBackend>> = OnceCell::new();

/// The llama.cpp backend may only be initialized once per process.
fn backend() -> Result<Arc<LlamaBackend>, EngineError> {
    BACKEND
        .get_or_try_init(|| {
            llama_cpp_2::send_logs_to_tracing(llama_cpp_2::LogOptions::default());
            LlamaBackend::init()
                .map(Arc::new)
                .map_err(|e| EngineError::BackendInit(e.to_string()))
        })
        .cloned()
}

fn inference_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::Inference(e.to_string())
}

fn gpu_layers_for(device_map: DeviceMap, backend: &LlamaBackend) -> u32 {
    match device_map {
        DeviceMap::Cpu => 0,
        DeviceMap::Gpu => ALL_LAYERS,
        DeviceMap::Auto if backend.supports_gpu_offload() => ALL_LAYERS,
        DeviceMap::Auto => 0,
    }
}

pub struct LlamaEngine {
    backend: Arc<LlamaBackend>,
    model: LlamaModel,
    info: LoadedModelInfo,
    n_threads: i32,
    /// Only one context is alive per model at a time
    generation_lock: Mutex<()>,
}

impl LlamaEngine {
    /// Load a GGUF file. Blocks for as long as llama.cpp needs to map the weights.
    pub fn load(path: &Path, config: &ChatConfig) -> Result<Self, EngineError> {
        let gguf = validate_gguf(path)?;
        let backend = backend()?;
        let gpu_layers = gpu_layers_for(config.device_map, &backend);

        tracing::info!(
            "Loading model: {} (precision={}, gpu_layers={}, gguf v{}, {} tensors)",
            path.display(),
            config.precision,
            gpu_layers,
            gguf.version,
            gguf.tensor_count
        );

        let model_params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers);
        let model = LlamaModel::load_from_file(&backend, path, &model_params)
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

        let has_chat_template = model.chat_template(None).is_ok();
        let context_size = match model.n_ctx_train() {
            0 => config.context_size,
            trained => config.context_size.min(trained),
        };

        let n_threads = std::thread::available_parallelism()
            .map(|n| n.get() as i32)
            .unwrap_or(4);

        let info = LoadedModelInfo {
            model_id: config.model_id.clone(),
            path: path.to_path_buf(),
            gpu_layers,
            context_size,
            has_chat_template,
            gguf,
        };
        tracing::info!(
            "Model loaded. context={} chat_template={}",
            info.context_size,
            info.has_chat_template
        );

        Ok(Self {
            backend,
            model,
            info,
            n_threads,
            generation_lock: Mutex::new(()),
        })
    }

    pub fn info(&self) -> &LoadedModelInfo {
        &self.info
    }

    /// Render the prompt with the model's chat template, or the plain transcript
    /// when the model has none.
    fn render_prompt(&self, prompt: &ChatPrompt) -> String {
        if !self.info.has_chat_template {
            return prompt.fallback_prompt();
        }

        let rendered = self.model.chat_template(None).ok().and_then(|template| {
            let chat: Result<Vec<LlamaChatMessage>, _> = prompt
                .messages()
                .into_iter()
                .map(|m| LlamaChatMessage::new(m.role.as_str().to_string(), m.content))
                .collect();
            match chat {
                Ok(chat) => self
                    .model
                    .apply_chat_template(&template, &chat, true)
                    .map_err(|e| tracing::warn!("Chat template failed, using fallback: {}", e))
                    .ok(),
                Err(e) => {
                    tracing::warn!("Invalid chat message, using fallback: {}", e);
                    None
                }
            }
        });

        rendered.unwrap_or_else(|| prompt.fallback_prompt())
    }

    fn sampler(params: &GenerationParams) -> LlamaSampler {
        if params.temperature <= f32::EPSILON {
            return LlamaSampler::greedy();
        }
        LlamaSampler::chain_simple([
            LlamaSampler::top_p(params.top_p, 1),
            LlamaSampler::temp(params.temperature),
            LlamaSampler::dist(params.seed),
        ])
    }
}

impl TextGenerator for LlamaEngine {
    #[tracing::instrument(skip_all, fields(model = %self.info.model_id, history = prompt.history.len()))]
    fn generate(
        &self,
        prompt: &ChatPrompt,
        params: &GenerationParams,
        sink: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<GenerationStats, EngineError> {
        let history_len = prompt.history.len();
        let _guard = self.generation_lock.lock();

        let context_size = self.info.context_size;
        // Leave room for the reply; older turns go first.
        let limit = (context_size as usize).saturating_sub(params.max_new_tokens as usize);
        let mut prompt = prompt.clone();
        let mut tokens = Vec::new();
        prompt.fit_history(limit, |candidate| {
            tokens = self
                .model
                .str_to_token(&self.render_prompt(candidate), AddBos::Always)
                .map_err(inference_error)?;
            Ok::<_, EngineError>(tokens.len())
        })?;
        if prompt.history.len() < history_len {
            tracing::debug!(
                "Dropped {} old turns to fit the context",
                history_len - prompt.history.len()
            );
        }

        if tokens.len() >= context_size as usize {
            return Err(EngineError::PromptTooLong {
                prompt_tokens: tokens.len(),
                context_size,
            });
        }

        let n_ctx = NonZeroU32::new(context_size)
            .ok_or_else(|| EngineError::Inference("Invalid context size".into()))?;
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            .with_n_threads(self.n_threads)
            .with_n_threads_batch(self.n_threads);
        let mut ctx = self
            .model
            .new_context(&self.backend, ctx_params)
            .map_err(inference_error)?;

        // Prefill in chunks; only the final prompt token needs logits.
        let mut batch = LlamaBatch::new(PREFILL_BATCH_SIZE, 1);
        let last_pos = tokens.len() as i32 - 1;
        let mut pos = 0i32;
        for chunk in tokens.chunks(PREFILL_BATCH_SIZE) {
            batch.clear();
            for &token in chunk {
                batch
                    .add(token, pos, &[0], pos == last_pos)
                    .map_err(inference_error)?;
                pos += 1;
            }
            ctx.decode(&mut batch).map_err(inference_error)?;
        }

        let budget = (params.max_new_tokens as usize).min(context_size as usize - tokens.len());
        let mut sampler = Self::sampler(params);
        let mut utf8 = Utf8Accumulator::default();
        let mut completion_tokens = 0usize;
        let mut finish_reason = FinishReason::Length;

        while completion_tokens < budget {
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(token);

            if self.model.is_eog_token(token) {
                finish_reason = FinishReason::Stop;
                break;
            }
            completion_tokens += 1;

            let bytes = self
                .model
                .token_to_bytes(token, Special::Plaintext)
                .map_err(inference_error)?;
            let piece = utf8.push(&bytes);
            if !piece.is_empty() && sink(&piece).is_break() {
                finish_reason = FinishReason::Cancelled;
                break;
            }

            batch.clear();
            batch.add(token, pos, &[0], true).map_err(inference_error)?;
            pos += 1;
            ctx.decode(&mut batch).map_err(inference_error)?;
        }

        if finish_reason != FinishReason::Cancelled {
            let rest = utf8.finish();
            if !rest.is_empty() {
                let _ = sink(&rest);
            }
        }

        tracing::debug!(
            "Generated {} tokens ({})",
            completion_tokens,
            finish_reason.as_str()
        );

        Ok(GenerationStats {
            prompt_tokens: tokens.len(),
            completion_tokens,
            finish_reason,
        })
    }
}

/// Resolves the configured model (downloading it if needed) and loads it with llama.cpp.
#[derive(Debug, Default, Clone)]
pub struct LlamaLoader;

#[async_trait]
impl ModelLoader for LlamaLoader {
    async fn load(&self, config: &ChatConfig) -> Result<Arc<dyn TextGenerator>, EngineError> {
        let path = huggingface::resolve_model(config).await?;
        let config = config.clone();
        let engine = tokio::task::spawn_blocking(move || LlamaEngine::load(&path, &config))
            .await
            .map_err(|e| EngineError::ModelLoad(e.to_string()))??;
        Ok(Arc::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_use_config_defaults() {
        let config = ChatConfig::default();
        let params = GenerationParams::resolve(&config, &GenerationOverrides::default());
        assert_eq!(params.max_new_tokens, 256);
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.top_p, 0.9);
        assert_eq!(params.seed, RANDOM_SEED);
    }

    #[test]
    fn test_params_overrides() {
        let config = ChatConfig::default();
        let params = GenerationParams::resolve(
            &config,
            &GenerationOverrides {
                max_new_tokens: Some(500),
                temperature: Some(0.0),
                top_p: Some(0.5),
            },
        );
        assert_eq!(params.max_new_tokens, 500);
        assert_eq!(params.temperature, 0.0);
        assert_eq!(params.top_p, 0.5);
    }

    #[test]
    fn test_zero_max_tokens_falls_back() {
        let config = ChatConfig::default();
        let params = GenerationParams::resolve(
            &config,
            &GenerationOverrides {
                max_new_tokens: Some(0),
                ..Default::default()
            },
        );
        assert_eq!(params.max_new_tokens, 256);
    }

    #[test]
    fn test_out_of_range_sampling_is_clamped() {
        let config = ChatConfig::default();
        let params = GenerationParams::resolve(
            &config,
            &GenerationOverrides {
                temperature: Some(-1.0),
                top_p: Some(3.0),
                ..Default::default()
            },
        );
        assert_eq!(params.temperature, 0.0);
        assert_eq!(params.top_p, 1.0);

        let params = GenerationParams::resolve(
            &config,
            &GenerationOverrides {
                top_p: Some(0.0),
                ..Default::default()
            },
        );
        assert_eq!(params.top_p, 1.0);
    }

    #[test]
    fn test_finish_reason_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&FinishReason::Length).unwrap(),
            "\"length\""
        );
    }
}
