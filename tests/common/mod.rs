//! Test doubles for the chat service

#![allow(dead_code)]

use async_trait::async_trait;
use localchat::inference::{
    ChatPrompt, EngineError, FinishReason, GenerationParams, GenerationStats, ModelLoader,
    TextGenerator,
};
use localchat::service::ChatService;
use localchat::types::ChatConfig;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};

/// Streams a fixed reply in small chunks and records every prompt it sees.
pub struct MockGenerator {
    reply: String,
    fail: bool,
    pub prompts: Mutex<Vec<ChatPrompt>>,
    pub params: Mutex<Vec<GenerationParams>>,
}

impl MockGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            fail: false,
            prompts: Mutex::new(Vec::new()),
            params: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }
}

impl TextGenerator for MockGenerator {
    fn generate(
        &self,
        prompt: &ChatPrompt,
        params: &GenerationParams,
        sink: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<GenerationStats, EngineError> {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.params.lock().unwrap().push(params.clone());
        if self.fail {
            return Err(EngineError::Inference("Mock generation failure".to_string()));
        }

        let chars: Vec<char> = self.reply.chars().collect();
        for chunk in chars.chunks(4) {
            let piece: String = chunk.iter().collect();
            if sink(&piece).is_break() {
                break;
            }
        }
        Ok(GenerationStats {
            prompt_tokens: 2 + prompt.history.len() * 2,
            completion_tokens: chars.len().div_ceil(4),
            finish_reason: FinishReason::Stop,
        })
    }
}

/// Hands out the same generator for every load.
pub struct MockLoader {
    pub generator: Arc<MockGenerator>,
}

#[async_trait]
impl ModelLoader for MockLoader {
    async fn load(&self, _config: &ChatConfig) -> Result<Arc<dyn TextGenerator>, EngineError> {
        Ok(self.generator.clone())
    }
}

pub fn test_config() -> ChatConfig {
    ChatConfig {
        model_id: "test/mock-model-GGUF".to_string(),
        system_prompt: "You are a test assistant.".to_string(),
        ..ChatConfig::default()
    }
}

/// A service that has not loaded a model yet
pub fn service_with(generator: Arc<MockGenerator>) -> Arc<ChatService> {
    Arc::new(ChatService::with_loader(
        test_config(),
        Arc::new(MockLoader { generator }),
    ))
}

/// A service with the mock model already loaded
pub async fn loaded_service(generator: Arc<MockGenerator>) -> Arc<ChatService> {
    let service = service_with(generator);
    service
        .ensure_loaded()
        .await
        .expect("mock model should load");
    service
}
