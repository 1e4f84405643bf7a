//! Configuration types
//!
//! Chat and HTTP server configuration, read from environment variables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_MODEL_ID: &str = "Qwen/Qwen2.5-3B-Instruct-GGUF";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Environment variable names understood by [`ChatConfig::from_env`].
pub mod keys {
    pub const MODEL_ID: &str = "MODEL_ID";
    pub const PRECISION: &str = "PRECISION";
    pub const MAX_NEW_TOKENS: &str = "MAX_NEW_TOKENS";
    pub const TEMPERATURE: &str = "TEMPERATURE";
    pub const TOP_P: &str = "TOP_P";
    pub const DEVICE_MAP: &str = "DEVICE_MAP";
    pub const SYSTEM_PROMPT: &str = "SYSTEM_PROMPT";
    pub const CONTEXT_SIZE: &str = "CONTEXT_SIZE";
    pub const MODELS_DIR: &str = "MODELS_DIR";
    pub const HF_TOKEN: &str = "HF_TOKEN";
    pub const API_HOST: &str = "API_HOST";
    pub const API_PORT: &str = "API_PORT";

    /// Every key read by the chat configuration.
    pub const ALL: [&str; 10] = [
        MODEL_ID,
        PRECISION,
        MAX_NEW_TOKENS,
        TEMPERATURE,
        TOP_P,
        DEVICE_MAP,
        SYSTEM_PROMPT,
        CONTEXT_SIZE,
        MODELS_DIR,
        HF_TOKEN,
    ];
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Weight precision requested for the model.
///
/// With GGUF checkpoints this selects which quantization file is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Auto,
    Fp16,
    Int4,
}

impl Precision {
    pub const ALL: [Precision; 3] = [Precision::Auto, Precision::Fp16, Precision::Int4];

    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Auto => "auto",
            Precision::Fp16 => "fp16",
            Precision::Int4 => "int4",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Precision::Auto),
            "fp16" => Ok(Precision::Fp16),
            "int4" => Ok(Precision::Int4),
            _ => Err(ConfigError::Invalid {
                key: keys::PRECISION,
                value: s.to_string(),
            }),
        }
    }
}

/// Where model layers are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMap {
    /// Offload to the GPU when the backend supports it, CPU otherwise
    #[default]
    Auto,
    Cpu,
    Gpu,
}

impl DeviceMap {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceMap::Auto => "auto",
            DeviceMap::Cpu => "cpu",
            DeviceMap::Gpu => "gpu",
        }
    }
}

impl fmt::Display for DeviceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceMap {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(DeviceMap::Auto),
            "cpu" => Ok(DeviceMap::Cpu),
            "gpu" | "cuda" => Ok(DeviceMap::Gpu),
            _ => Err(ConfigError::Invalid {
                key: keys::DEVICE_MAP,
                value: s.to_string(),
            }),
        }
    }
}

/// Chat configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Hugging Face repo id, `repo/file.gguf`, Hub URL or local GGUF path
    pub model_id: String,
    pub precision: Precision,
    /// Default number of tokens to generate per reply
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub device_map: DeviceMap,
    pub system_prompt: String,
    /// Context window size in tokens
    pub context_size: u32,
    /// Directory where downloaded GGUF files are stored
    pub models_dir: PathBuf,
    /// Bearer token for gated Hub repositories
    #[serde(skip_serializing)]
    pub hf_token: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            precision: Precision::Auto,
            max_new_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            device_map: DeviceMap::Auto,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            context_size: 4096,
            models_dir: default_models_dir(),
            hf_token: None,
        }
    }
}

fn default_models_dir() -> PathBuf {
    crate::storage::get_data_dir()
        .map(|dir| dir.join("models"))
        .unwrap_or_else(|_| PathBuf::from("./models"))
}

fn parse<T: FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value: raw })
}

impl ChatConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`; missing keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup(keys::MODEL_ID).filter(|v| !v.trim().is_empty()) {
            config.model_id = v.trim().to_string();
        }
        if let Some(v) = lookup(keys::PRECISION) {
            config.precision = v.parse()?;
        }
        if let Some(v) = lookup(keys::MAX_NEW_TOKENS) {
            config.max_new_tokens = parse(keys::MAX_NEW_TOKENS, v)?;
        }
        if let Some(v) = lookup(keys::TEMPERATURE) {
            config.temperature = parse(keys::TEMPERATURE, v)?;
        }
        if let Some(v) = lookup(keys::TOP_P) {
            config.top_p = parse(keys::TOP_P, v)?;
        }
        if let Some(v) = lookup(keys::DEVICE_MAP) {
            config.device_map = v.parse()?;
        }
        if let Some(v) = lookup(keys::SYSTEM_PROMPT) {
            config.system_prompt = v;
        }
        if let Some(v) = lookup(keys::CONTEXT_SIZE) {
            config.context_size = match parse::<u32>(keys::CONTEXT_SIZE, v.clone())? {
                0 => {
                    return Err(ConfigError::Invalid {
                        key: keys::CONTEXT_SIZE,
                        value: v,
                    })
                }
                n => n,
            };
        }
        if let Some(v) = lookup(keys::MODELS_DIR).filter(|v| !v.trim().is_empty()) {
            config.models_dir = PathBuf::from(v.trim());
        }
        config.hf_token = lookup(keys::HF_TOKEN).filter(|v| !v.trim().is_empty());

        Ok(config)
    }

    /// Copy of this configuration pointing at another model
    pub fn with_model(&self, model_id: impl Into<String>, precision: Precision) -> Self {
        Self {
            model_id: model_id.into(),
            precision,
            ..self.clone()
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup(keys::API_HOST).filter(|v| !v.trim().is_empty()) {
            config.host = v.trim().to_string();
        }
        if let Some(v) = lookup(keys::API_PORT) {
            config.port = parse(keys::API_PORT, v)?;
        }
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
