//! Business logic: provider selection, coordination store, keep-alive
//! monitoring, prompt lookup and hook pipelines.

pub mod chooser;
pub mod hooks;
pub mod keep_alive;
pub mod prompts;
pub mod store;
pub mod strategies;

pub use chooser::{ApiModel, ProviderChooser};
pub use hooks::{AuditRecord, Auditor, Guardrail, HookRegistry, MaskerRule, Verdict};
pub use keep_alive::KeepAliveMonitor;
pub use prompts::PromptStore;
pub use store::RedisStore;
pub use strategies::{build_strategy, ProviderStrategy};
