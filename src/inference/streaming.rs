//! Streaming bridge
//!
//! Generation is a blocking call, so every request gets its own thread. The
//! thread forwards decoded text through a channel and finishes with exactly one
//! terminal token (`Done` or `Error`). Consumers are the GUI (which renders
//! chunks as they arrive) and the HTTP handler (which buffers them).

use crate::inference::engine::{EngineError, GenerationParams, GenerationStats, TextGenerator};
use crate::inference::prompt::ChatPrompt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// A message from the generation thread
#[derive(Debug)]
pub enum StreamToken {
    /// Next piece of generated text
    Token(String),
    /// Generation finished
    Done(GenerationStats),
    /// Generation failed
    Error(EngineError),
}

/// Full reply collected from a stream
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub stats: GenerationStats,
}

/// Receiving end of one running generation.
///
/// Dropping it stops the generation thread at its next chunk.
pub struct GenerationStream {
    receiver: UnboundedReceiver<StreamToken>,
    stop: Arc<AtomicBool>,
}

impl GenerationStream {
    pub async fn next(&mut self) -> Option<StreamToken> {
        self.receiver.recv().await
    }

    /// Ask the generation thread to stop; it still sends a terminal `Done`.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Buffer the whole reply.
    pub async fn collect(mut self) -> Result<Completion, EngineError> {
        let mut text = String::new();
        while let Some(token) = self.next().await {
            match token {
                StreamToken::Token(piece) => text.push_str(&piece),
                StreamToken::Done(stats) => return Ok(Completion { text, stats }),
                StreamToken::Error(e) => return Err(e),
            }
        }
        Err(EngineError::Inference(
            "generation thread exited without finishing".to_string(),
        ))
    }
}

/// Run `generator` on a dedicated thread and stream its output.
pub fn spawn_generation(
    generator: Arc<dyn TextGenerator>,
    prompt: ChatPrompt,
    params: GenerationParams,
) -> GenerationStream {
    let (tx, receiver) = mpsc::unbounded_channel();
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let failure_tx = tx.clone();

    let spawned = std::thread::Builder::new()
        .name("generation".to_string())
        .spawn(move || {
            let mut sink = |text: &str| {
                if stop_flag.load(Ordering::Relaxed) {
                    return ControlFlow::Break(());
                }
                match tx.send(StreamToken::Token(text.to_string())) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(_) => {
                        tracing::debug!("Stream receiver dropped, stopping generation");
                        ControlFlow::Break(())
                    }
                }
            };

            let terminal = match generator.generate(&prompt, &params, &mut sink) {
                Ok(stats) => StreamToken::Done(stats),
                Err(e) => {
                    tracing::error!("Generation failed: {}", e);
                    StreamToken::Error(e)
                }
            };
            let _ = tx.send(terminal);
        });

    if let Err(e) = spawned {
        tracing::error!("Failed to spawn generation thread: {}", e);
        let _ = failure_tx.send(StreamToken::Error(EngineError::Inference(e.to_string())));
    }

    GenerationStream { receiver, stop }
}

/// Reassembles UTF-8 text from token byte pieces.
///
/// A multi-byte character can be split across tokens; the incomplete tail is
/// held back until the rest arrives.
#[derive(Debug, Default)]
pub struct Utf8Accumulator {
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    /// Append `bytes` and return every character that is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end; wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is still held back, replacing invalid bytes.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::engine::{FinishReason, RANDOM_SEED};
    use std::time::Duration;

    fn params() -> GenerationParams {
        GenerationParams {
            max_new_tokens: 16,
            temperature: 0.7,
            top_p: 0.9,
            seed: RANDOM_SEED,
        }
    }

    struct Scripted(Vec<&'static str>);

    impl TextGenerator for Scripted {
        fn generate(
            &self,
            _prompt: &ChatPrompt,
            _params: &GenerationParams,
            sink: &mut dyn FnMut(&str) -> ControlFlow<()>,
        ) -> Result<GenerationStats, EngineError> {
            for (i, chunk) in self.0.iter().enumerate() {
                if sink(chunk).is_break() {
                    return Ok(GenerationStats {
                        prompt_tokens: 3,
                        completion_tokens: i + 1,
                        finish_reason: FinishReason::Cancelled,
                    });
                }
            }
            Ok(GenerationStats {
                prompt_tokens: 3,
                completion_tokens: self.0.len(),
                finish_reason: FinishReason::Stop,
            })
        }
    }

    struct Failing;

    impl TextGenerator for Failing {
        fn generate(
            &self,
            _prompt: &ChatPrompt,
            _params: &GenerationParams,
            sink: &mut dyn FnMut(&str) -> ControlFlow<()>,
        ) -> Result<GenerationStats, EngineError> {
            let _ = sink("partial");
            Err(EngineError::Inference("decode failed".to_string()))
        }
    }

    /// Emits chunks until told to stop, then reports how it ended.
    struct Endless {
        stopped: Arc<AtomicBool>,
    }

    impl TextGenerator for Endless {
        fn generate(
            &self,
            _prompt: &ChatPrompt,
            _params: &GenerationParams,
            sink: &mut dyn FnMut(&str) -> ControlFlow<()>,
        ) -> Result<GenerationStats, EngineError> {
            let mut n = 0;
            loop {
                n += 1;
                if sink("tick ").is_break() {
                    self.stopped.store(true, Ordering::SeqCst);
                    return Ok(GenerationStats {
                        prompt_tokens: 1,
                        completion_tokens: n,
                        finish_reason: FinishReason::Cancelled,
                    });
                }
                std::thread::sleep(Duration::from_millis(2));
            }
        }
    }

    #[tokio::test]
    async fn test_chunks_arrive_in_order_then_done() {
        let mut stream = spawn_generation(
            Arc::new(Scripted(vec!["Hel", "lo", ", world"])),
            ChatPrompt::default(),
            params(),
        );

        let mut pieces = Vec::new();
        let stats = loop {
            match stream.next().await.expect("stream ended early") {
                StreamToken::Token(t) => pieces.push(t),
                StreamToken::Done(stats) => break stats,
                StreamToken::Error(e) => panic!("unexpected error: {e}"),
            }
        };

        assert_eq!(pieces, vec!["Hel", "lo", ", world"]);
        assert_eq!(stats.completion_tokens, 3);
        assert_eq!(stats.finish_reason, FinishReason::Stop);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_collect_buffers_reply() {
        let completion = spawn_generation(
            Arc::new(Scripted(vec!["a", "b", "c"])),
            ChatPrompt::default(),
            params(),
        )
        .collect()
        .await
        .unwrap();
        assert_eq!(completion.text, "abc");
        assert_eq!(completion.stats.prompt_tokens, 3);
    }

    #[tokio::test]
    async fn test_error_is_terminal() {
        let mut stream = spawn_generation(Arc::new(Failing), ChatPrompt::default(), params());
        assert!(matches!(stream.next().await, Some(StreamToken::Token(t)) if t == "partial"));
        assert!(matches!(
            stream.next().await,
            Some(StreamToken::Error(EngineError::Inference(_)))
        ));

        let err = spawn_generation(Arc::new(Failing), ChatPrompt::default(), params())
            .collect()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("decode failed"));
    }

    #[tokio::test]
    async fn test_stop_cancels_generation() {
        let stopped = Arc::new(AtomicBool::new(false));
        let mut stream = spawn_generation(
            Arc::new(Endless {
                stopped: stopped.clone(),
            }),
            ChatPrompt::default(),
            params(),
        );

        assert!(matches!(stream.next().await, Some(StreamToken::Token(_))));
        stream.stop();

        let stats = loop {
            match stream.next().await.expect("stream ended early") {
                StreamToken::Done(stats) => break stats,
                StreamToken::Token(_) => continue,
                StreamToken::Error(e) => panic!("unexpected error: {e}"),
            }
        };
        assert_eq!(stats.finish_reason, FinishReason::Cancelled);
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dropping_receiver_stops_generation() {
        let stopped = Arc::new(AtomicBool::new(false));
        let stream = spawn_generation(
            Arc::new(Endless {
                stopped: stopped.clone(),
            }),
            ChatPrompt::default(),
            params(),
        );
        drop(stream);

        for _ in 0..500 {
            if stopped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_utf8_split_across_pieces() {
        let mut acc = Utf8Accumulator::default();
        let bytes = "é🦀".as_bytes();

        assert_eq!(acc.push(&bytes[..1]), "");
        assert_eq!(acc.push(&bytes[1..3]), "é");
        assert_eq!(acc.push(&bytes[3..5]), "");
        assert_eq!(acc.push(&bytes[5..]), "🦀");
        assert_eq!(acc.finish(), "");
    }

    #[test]
    fn test_utf8_invalid_bytes_are_replaced() {
        let mut acc = Utf8Accumulator::default();
        assert_eq!(acc.push(b"ok\xFFgo"), "ok\u{FFFD}go");

        assert_eq!(acc.push(&[0xE2, 0x82]), "");
        assert_eq!(acc.finish(), "\u{FFFD}");
    }
}
