//! Scripted in-process model for tests.
//!
//! Replies are chosen by the first rule whose needle occurs in the request's
//! full prompt text. Every request is recorded for later inspection.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{Completion, CompletionRequest, Error, LanguageModel, Result};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

#[derive(Debug, Default)]
pub struct ScriptedLlm {
    rules: Vec<(String, Reply)>,
    fallback: Option<Reply>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `reply` when the prompt contains `needle`.
    pub fn when(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Reply::Text(reply.into())));
        self
    }

    /// Fail with an LLM error when the prompt contains `needle`.
    pub fn fail_when(mut self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Reply::Fail(message.into())));
        self
    }

    /// Reply used when no rule matches.
    pub fn otherwise(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(Reply::Text(reply.into()));
        self
    }

    /// Fail every request that no rule matches.
    pub fn otherwise_fail(mut self, message: impl Into<String>) -> Self {
        self.fallback = Some(Reply::Fail(message.into()));
        self
    }

    /// Requests received so far, in order.
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let text = request.full_text();
        let model = request.model.clone().unwrap_or_else(|| "scripted".to_string());

        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);

        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, reply)| reply)
            .or(self.fallback.as_ref());

        match reply {
            Some(Reply::Text(reply)) => Ok(Completion {
                text: reply.clone(),
                provider: "scripted".to_string(),
                model,
            }),
            Some(Reply::Fail(message)) => Err(Error::Llm(message.clone())),
            None => Err(Error::Llm("no scripted reply".to_string())),
        }
    }
}
