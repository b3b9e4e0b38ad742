//! The seam between the execution engine and a live connection.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::types::{Batch, BatchOutput, BatchResult};

/// Runs one batch against a server.
///
/// Implementations should watch `cancel` and return
/// [`BatchError::Cancelled`](crate::BatchError::Cancelled) promptly once it
/// trips. The engine also stops waiting on its own when it does.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    async fn execute(&self, batch: &Batch, cancel: &CancellationToken) -> BatchResult<BatchOutput>;
}
