//! LLM inference
//!
//! This module handles all interaction with llama.cpp: prompt assembly, model
//! loading, generation and the streaming bridge to consumers.

pub mod engine;
pub mod model;
pub mod prompt;
pub mod streaming;

pub use engine::{
    EngineError, FinishReason, GenerationOverrides, GenerationParams, GenerationStats,
    LlamaEngine, LlamaLoader, ModelLoader, TextGenerator,
};
pub use prompt::ChatPrompt;
pub use streaming::{spawn_generation, Completion, GenerationStream, StreamToken};
