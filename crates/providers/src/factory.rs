//! Model factory.
//!
//! Resolves `provider/model` identifiers to registered provider adapters
//! and wraps every resolved provider in the retry decorator. When no
//! model is named, the provider is selected from whichever API key is
//! present in the environment.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use sr_domain::error::{Error, Result};

use crate::retry::{RetryPolicy, RetryingProvider};
use crate::traits::LlmProvider;

/// Environment variables that select a default provider, in priority
/// order.
const ENV_PROVIDERS: &[(&str, &str)] = &[
    ("ANTHROPIC_API_KEY", "anthropic"),
    ("OPENAI_API_KEY", "openai"),
    ("GEMINI_API_KEY", "gemini"),
];

/// A resolved model: the (retry-wrapped) provider plus the model name to
/// pass through on each request.
#[derive(Clone)]
pub struct ResolvedModel {
    pub provider: Arc<dyn LlmProvider>,
    pub model_name: Option<String>,
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("model_name", &self.model_name)
            .finish_non_exhaustive()
    }
}

pub struct ModelFactory {
    providers: RwLock<HashMap<String, Arc<dyn LlmProvider>>>,
    default_model: Option<String>,
    retry_policy: RetryPolicy,
}

impl ModelFactory {
    pub fn new(default_model: Option<String>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            default_model,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Register a provider adapter under its provider id.
    pub fn register(&self, provider_id: &str, provider: Arc<dyn LlmProvider>) {
        self.providers.write().insert(provider_id.to_owned(), provider);
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Resolve a model identifier (or the configured/environment default)
    /// to a retry-wrapped provider.
    pub fn get_model(&self, model: Option<&str>) -> Result<ResolvedModel> {
        let spec = match model {
            Some(m) => m.to_owned(),
            None => self.default_spec()?,
        };

        let (provider_id, model_name) = match spec.split_once('/') {
            Some((p, m)) => (p.to_owned(), Some(m.to_owned())),
            None => (spec.clone(), None),
        };

        let inner = self
            .providers
            .read()
            .get(&provider_id)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no provider registered for '{provider_id}'")))?;

        tracing::debug!(provider = %provider_id, model = ?model_name, "resolved model");
        Ok(ResolvedModel {
            provider: Arc::new(RetryingProvider::with_policy(inner, self.retry_policy.clone())),
            model_name,
        })
    }

    fn default_spec(&self) -> Result<String> {
        if let Some(m) = &self.default_model {
            return Ok(m.clone());
        }
        for (var, provider) in ENV_PROVIDERS {
            if std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false) {
                return Ok((*provider).to_owned());
            }
        }
        Err(Error::Config(
            "no model specified and no provider API key found in the environment".into(),
        ))
    }
}
