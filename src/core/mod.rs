//! Core functionality: configuration, catalog, errors, api-type dispatch,
//! metrics and logging.

pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod duration;
pub mod error;
pub mod logging;
pub mod metrics;

pub use catalog::{ModelCatalog, ModelEntry, ProviderSpec};
pub use config::AppConfig;
pub use dispatcher::{ApiType, API_TYPES};
pub use error::{Result, RouterError};
pub use metrics::{get_metrics, init_metrics};
