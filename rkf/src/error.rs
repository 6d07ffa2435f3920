use common::{GrainId, RpcError};

use crate::backend_set::NoBackendsAvailable;

/// Failure of a request served by the frontend.
#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    #[error("no such grain: {0}")]
    NotFound(GrainId),
    #[error("grain already exists: {0}")]
    AlreadyExists(GrainId),
    #[error("disconnected: {0}")]
    Disconnected(&'static str),
    #[error("not implemented: {0}")]
    Unimplemented(&'static str),
    #[error(transparent)]
    NoBackends(#[from] NoBackendsAvailable),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl FrontendError {
    /// Whether the caller may retry, which picks fresh backends.
    pub fn is_transient(&self) -> bool {
        match self {
            FrontendError::Disconnected(_) | FrontendError::NoBackends(_) => true,
            FrontendError::Rpc(e) => e.is_disconnected(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrontendError>;
