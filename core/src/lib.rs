pub mod backend;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod error_map;
pub mod inspect;
pub mod rewriter;
pub mod types;

// Re-export main types
pub use types::*;

pub use config::Config;
pub use coordinator::{prepare_for_external_host, Coordinator};
pub use error::ExecutionError;
pub use inspect::SerializedValue;
