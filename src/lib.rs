//! LLM Router - a reverse proxy gateway for LLM backends
//!
//! The router receives chat, completion and embedding requests in the
//! OpenAI, Ollama, vLLM or LM Studio wire formats and forwards them to
//! one of several upstream inference servers registered for the
//! requested model. A set of built-in endpoints injects prompt templates
//! and can fan one request out into one upstream call per user message.
//!
//! # Architecture
//!
//! - [`core`]: configuration, model catalog, api-type dispatch, errors,
//!   metrics.
//! - [`services`]: provider selection strategies, the coordination-store
//!   adapter, the keep-alive monitor, prompt and hook collaborators.
//! - [`api`]: endpoint descriptors, the request dispatch pipeline, the
//!   streaming relay and route registration.

pub mod api;
pub mod core;
pub mod services;

pub use api::{build_router, AppState};
pub use core::{AppConfig, ModelCatalog, Result, RouterError};
pub use services::{ProviderChooser, RedisStore};
