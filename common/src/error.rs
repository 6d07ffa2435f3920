/// Failure of a call on a remote capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("disconnected: {0}")]
    Disconnected(String),
    #[error("no such object: {0}")]
    NoSuchObject(String),
    #[error("call failed: {0}")]
    Failed(String),
}

impl RpcError {
    /// Disconnects are transient; the caller may retry against another backend.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, RpcError::Disconnected(_))
    }
}
