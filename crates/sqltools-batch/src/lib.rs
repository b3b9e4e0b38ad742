//! sqltools-batch: T-SQL batch parsing and execution for GO-separated scripts.

pub mod engine;
pub mod executor;
pub mod lexer;
pub mod parser;
pub mod types;

pub use engine::{ExecutionEngine, ExecutionEvent, ExecutionHandle, ExecutionOptions};
pub use executor::BatchExecutor;
pub use parser::{parse_batches, BatchParser};
pub use tokio_util::sync::CancellationToken;
pub use types::*;
