use std::sync::Arc;

use crate::clients::{CompletionProvider, MistralClient};
use crate::config::AppSettings;
use crate::error::AppError;

/// Application state shared across request handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<AppSettings>,
    /// Present only when an upstream credential is configured
    pub provider: Option<Arc<dyn CompletionProvider>>,
}

impl AppState {
    /// Build state from settings, wiring the Mistral client when a key is configured.
    pub fn from_settings(settings: AppSettings) -> Result<Self, AppError> {
        let provider: Option<Arc<dyn CompletionProvider>> = if settings.upstream.api_key.is_some() {
            Some(Arc::new(MistralClient::new(&settings)?))
        } else {
            None
        };

        Ok(Self {
            settings: Arc::new(settings),
            provider,
        })
    }

    pub fn with_provider(settings: AppSettings, provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            settings: Arc::new(settings),
            provider: Some(provider),
        }
    }

    pub fn is_mock(&self) -> bool {
        self.settings.streaming.mock
    }
}
