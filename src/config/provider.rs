//! Recognition provider selection.
//!
//! The API key and model are read from the environment once at startup. Two
//! providers speak the same chat-completions wire format and differ only in
//! endpoint, key variable and default model.

use std::fmt;

use crate::error::{OcrError, OcrResult};

/// Supported recognition providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Provider {
    #[value(name = "openai")]
    OpenAi,
    #[value(name = "openrouter")]
    OpenRouter,
}

impl Provider {
    /// Environment variable holding the API key.
    pub fn key_var(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    /// Environment variable overriding the default model.
    pub fn model_var(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_MODEL",
            Provider::OpenRouter => "OPENROUTER_MODEL",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o",
            Provider::OpenRouter => "google/gemini-flash-1.5",
        }
    }

    pub fn api_url(self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1/chat/completions",
            Provider::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::OpenRouter => "OpenRouter",
        }
    }
}

/// Resolved, immutable provider settings.
#[derive(Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

// Keep the key out of logs.
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

impl ProviderConfig {
    /// Resolves the provider from process environment variables.
    pub fn from_env(choice: Option<Provider>) -> OcrResult<Self> {
        Self::resolve(choice, |name| std::env::var(name).ok())
    }

    /// Resolves the provider through an arbitrary variable lookup.
    ///
    /// With an explicit choice only that provider's key is accepted. Without
    /// one, OpenAI wins when both keys are present.
    pub fn resolve<F>(choice: Option<Provider>, lookup: F) -> OcrResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key_for = |provider: Provider| {
            lookup(provider.key_var())
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty())
        };

        let (provider, api_key) = match choice {
            Some(provider) => match key_for(provider) {
                Some(key) => (provider, key),
                None => {
                    return Err(OcrError::config(
                        provider.key_var(),
                        "<unset>",
                        format!("{} selected but no API key configured", provider.name()),
                    ));
                }
            },
            None => [Provider::OpenAi, Provider::OpenRouter]
                .into_iter()
                .find_map(|provider| key_for(provider).map(|key| (provider, key)))
                .ok_or_else(|| {
                    OcrError::config(
                        "OPENAI_API_KEY / OPENROUTER_API_KEY",
                        "<unset>",
                        "no recognition provider API key configured",
                    )
                })?,
        };

        let model = lookup(provider.model_var())
            .map(|model| model.trim().to_string())
            .filter(|model| !model.is_empty())
            .unwrap_or_else(|| provider.default_model().to_string());

        Ok(Self {
            provider,
            api_url: provider.api_url().to_string(),
            api_key,
            model,
        })
    }

    /// Replaces the model when an override is given.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            self.model = model;
        }
        self
    }

    pub fn name(&self) -> &'static str {
        self.provider.name()
    }
}
