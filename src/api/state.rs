//! Shared application state.

use std::sync::Arc;

use crate::core::catalog::ModelCatalog;
use crate::core::config::AppConfig;
use crate::services::chooser::ProviderChooser;
use crate::services::hooks::HookRegistry;
use crate::services::prompts::PromptStore;

/// Per-process singletons, instantiated once at startup and passed to
/// every handler by reference.
pub struct AppState {
    pub config: AppConfig,
    pub catalog: Arc<ModelCatalog>,
    pub chooser: Arc<ProviderChooser>,
    pub http_client: reqwest::Client,
    pub prompts: PromptStore,
    pub hooks: HookRegistry,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        catalog: Arc<ModelCatalog>,
        chooser: Arc<ProviderChooser>,
        http_client: reqwest::Client,
        prompts: PromptStore,
        hooks: HookRegistry,
    ) -> Self {
        AppState {
            config,
            catalog,
            chooser,
            http_client,
            prompts,
            hooks,
        }
    }
}
