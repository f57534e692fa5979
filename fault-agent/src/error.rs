use fault_core::{CompileError, ProxyError};
use std::path::PathBuf;
use thiserror::Error;

/// Startup failures of the sidecar agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Bootstrap rules in {} are invalid: {source}", .path.display())]
    BootstrapRules {
        path: PathBuf,
        #[source]
        source: CompileError,
    },

    #[error(transparent)]
    Proxy(#[from] ProxyError),
}
