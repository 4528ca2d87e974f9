//! HTTP surface: endpoint descriptors, the dispatch pipeline, streaming
//! relay and route registration.

pub mod builtin;
pub mod endpoint;
pub mod passthrough;
pub mod registry;
pub mod state;
pub mod streaming;
pub mod upstream;

pub use endpoint::{dispatch, EndpointSpec, Envelope, Operation, PreparedPayload};
pub use registry::{all_endpoints, build_router};
pub use state::AppState;
