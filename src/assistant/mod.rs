pub mod cli;
pub mod intents;
pub mod prompt;

use crate::dashboard::DashboardView;
use crate::errors::{AppError, AppResult};
use crate::models::ServiceOrder;
use crate::redaction::Redactor;
use crate::session::ChatMessage;
use intents::{AssistantIntent, IntentIssue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub timeout: Duration,
    pub api_token: Option<String>,
}

/// Text-in, text-out model backend.
pub trait CompletionProvider: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> AppResult<String>;
}

/// Per-call options resolved from settings and the keyring.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub model: Option<String>,
    pub timeout: Duration,
    pub api_token: Option<String>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            model: None,
            timeout: Duration::from_secs(60),
            api_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantReply {
    pub text: String,
    pub intents: Vec<AssistantIntent>,
    pub issues: Vec<IntentIssue>,
}

/// Builds prompts, calls the provider and turns replies into typed results.
/// Calls block on the provider, so async callers go through `spawn_blocking`.
#[derive(Clone)]
pub struct Assistant {
    provider: Option<Arc<dyn CompletionProvider>>,
    redactor: Redactor,
}

impl Assistant {
    pub fn new(provider: Option<Arc<dyn CompletionProvider>>) -> Self {
        Self {
            provider,
            redactor: Redactor::default(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    pub fn summarize_order(&self, order: &ServiceOrder, options: &CallOptions) -> AppResult<String> {
        let prompt = prompt::order_summary(order, &self.redactor);
        let reply = self.call(prompt, options)?;
        Ok(reply.trim().to_string())
    }

    pub fn financial_insight(&self, studio_name: &str, view: &DashboardView, options: &CallOptions) -> AppResult<String> {
        let prompt = prompt::financial_insight(studio_name, view, &self.redactor);
        let reply = self.call(prompt, options)?;
        Ok(reply.trim().to_string())
    }

    /// Chat turn that may carry function calls. Calls that fail validation
    /// come back as issues rather than failing the whole turn.
    pub fn interpret(
        &self,
        message: &str,
        history: &[ChatMessage],
        orders: &[ServiceOrder],
        options: &CallOptions,
    ) -> AppResult<AssistantReply> {
        if message.trim().is_empty() {
            return Err(AppError::Validation("Message cannot be empty".to_string()));
        }
        let prompt = prompt::intent_extraction(message, history, orders, &self.redactor);
        let raw = self.call(prompt, options)?;
        let parsed = intents::parse_reply(&raw);
        if !parsed.issues.is_empty() {
            tracing::warn!(issues = parsed.issues.len(), "assistant reply carried invalid function calls");
        }
        Ok(AssistantReply {
            text: parsed.text,
            intents: parsed.intents,
            issues: parsed.issues,
        })
    }

    fn call(&self, prompt: String, options: &CallOptions) -> AppResult<String> {
        let Some(provider) = &self.provider else {
            return Err(AppError::Assistant("No assistant command is configured".to_string()));
        };
        let request = CompletionRequest {
            prompt,
            model: options.model.clone(),
            timeout: options.timeout,
            api_token: options.api_token.clone(),
        };
        let started = std::time::Instant::now();
        let reply = provider.complete(&request)?;
        tracing::info!(
            prompt_chars = request.prompt.chars().count(),
            reply_chars = reply.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "assistant call finished"
        );
        if reply.trim().is_empty() {
            return Err(AppError::Assistant("Assistant returned an empty reply".to_string()));
        }
        Ok(reply)
    }
}
