use crate::error::TransportError;
use crate::observer::SessionDelegate;
use crate::task::TaskId;
use std::sync::Arc;

/// What the coordinator asks the transport to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub id: TaskId,
    pub url: String,
}

/// The networking layer the coordinator delegates to.
///
/// Implementations own retries, staging of partial bytes and resumption.
/// They report back through `delegate` from their own execution context and
/// must not call it from inside `submit` or `cancel`.
pub trait Transport: Send + Sync {
    fn submit(&self, request: TransferRequest, delegate: Arc<dyn SessionDelegate>) -> Result<(), TransportError>;

    /// Stops work on `id` if it is still running. Unknown ids are ignored.
    fn cancel(&self, id: TaskId);
}
