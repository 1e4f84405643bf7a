//! Prompt assembly
//!
//! A chat request is a system prompt, the earlier turns of the conversation and
//! the new user message. Models that ship a chat template get the structured
//! message list; the rest get a plain tag-delimited transcript.

use crate::types::message::{Message, Turn};

/// Everything needed to build one generation prompt
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatPrompt {
    pub system: String,
    pub history: Vec<Turn>,
    pub user: String,
}

impl ChatPrompt {
    pub fn new(system: impl Into<String>, history: Vec<Turn>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            history,
            user: user.into(),
        }
    }

    /// System message, then each earlier turn as user/assistant, then the new user message.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() * 2 + 2);
        messages.push(Message::system(self.system.clone()));
        for turn in &self.history {
            messages.push(Message::user(turn.user.clone()));
            messages.push(Message::assistant(turn.assistant.clone()));
        }
        messages.push(Message::user(self.user.clone()));
        messages
    }

    /// Transcript used when the model has no chat template.
    ///
    /// Ends with an open `<assistant>` block for the model to complete.
    pub fn fallback_prompt(&self) -> String {
        let mut prompt = format!("<system>\n{}\n</system>\n", self.system);
        for turn in &self.history {
            prompt.push_str(&format!(
                "<user>\n{}\n</user>\n<assistant>\n{}\n</assistant>\n",
                turn.user, turn.assistant
            ));
        }
        prompt.push_str(&format!("<user>\n{}\n</user>\n<assistant>\n", self.user));
        prompt
    }

    /// Drop the oldest turns until `measure` reports at most `limit`.
    ///
    /// Returns the last measured size. The system prompt and the new user
    /// message are never dropped, so the result can still exceed `limit`.
    pub fn fit_history<E>(
        &mut self,
        limit: usize,
        mut measure: impl FnMut(&ChatPrompt) -> Result<usize, E>,
    ) -> Result<usize, E> {
        loop {
            let size = measure(self)?;
            if size <= limit || self.history.is_empty() {
                return Ok(size);
            }
            self.history.remove(0);
        }
    }
}
