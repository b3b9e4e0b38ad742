//! Drives `GO`-separated batch execution against an executor, with
//! repeat counts, error actions, timeouts and cooperative cancellation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::executor::BatchExecutor;
use crate::parser::BatchParser;
use crate::types::{
    Batch, BatchError, BatchExecutionResult, ErrorAction, ParserOptions, ScriptExecutionResult,
};

/// Options for a single script execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    pub parser: ParserOptions,
    /// Stop at the first failing batch even without `:on error exit`.
    pub halt_on_error: bool,
    /// Per-batch timeout. `None` waits indefinitely.
    pub batch_timeout: Option<Duration>,
}

/// Progress notifications emitted while a script runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    BatchStarted {
        batch_index: usize,
        iteration: u32,
        batch: Batch,
    },
    BatchMessage {
        batch_index: usize,
        message: String,
        is_error: bool,
    },
    BatchFinished {
        batch_index: usize,
        iteration: u32,
        result: BatchExecutionResult,
        rows_affected: Option<u64>,
        elapsed_ms: u64,
    },
    ScriptFinished {
        result: ScriptExecutionResult,
    },
}

enum BatchOutcome {
    Completed(crate::types::BatchResult<crate::types::BatchOutput>),
    Cancelled,
    TimedOut,
}

/// Executes scripts through a [`BatchExecutor`].
#[derive(Clone)]
pub struct ExecutionEngine {
    executor: Arc<dyn BatchExecutor>,
}

impl ExecutionEngine {
    pub fn new(executor: Arc<dyn BatchExecutor>) -> Self {
        Self { executor }
    }

    /// Start executing `script` on a background task.
    pub fn spawn(
        &self,
        script: String,
        options: ExecutionOptions,
        events: mpsc::UnboundedSender<ExecutionEvent>,
    ) -> ExecutionHandle {
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        let engine = self.clone();
        let token = cancel.clone();

        tokio::spawn(async move {
            let result = engine.run(&script, &options, &events, &token).await;
            let _ = done_tx.send(Some(result));
        });

        ExecutionHandle {
            cancel,
            done: done_rx,
        }
    }

    /// Execute `script` to completion on the current task.
    pub async fn run(
        &self,
        script: &str,
        options: &ExecutionOptions,
        events: &mpsc::UnboundedSender<ExecutionEvent>,
        cancel: &CancellationToken,
    ) -> ScriptExecutionResult {
        let parsed = match BatchParser::new(options.parser.clone()).parse(script) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("script failed to parse: {e}");
                let _ = events.send(ExecutionEvent::BatchMessage {
                    batch_index: 0,
                    message: e.to_string(),
                    is_error: true,
                });
                return finish(events, ScriptExecutionResult::Failure);
            }
        };

        let halt = options.halt_on_error || parsed.on_error == ErrorAction::Exit;
        let mut any_failed = false;

        for (batch_index, batch) in parsed.batches.iter().enumerate() {
            for iteration in 1..=batch.repeat_count {
                if cancel.is_cancelled() {
                    return finish(events, ScriptExecutionResult::Cancel);
                }

                let _ = events.send(ExecutionEvent::BatchStarted {
                    batch_index,
                    iteration,
                    batch: batch.clone(),
                });
                let started = Instant::now();

                let (result, rows_affected) =
                    match self.run_batch(batch, options.batch_timeout, cancel).await {
                        BatchOutcome::Completed(Ok(output)) => {
                            for message in output.messages {
                                let _ = events.send(ExecutionEvent::BatchMessage {
                                    batch_index,
                                    message,
                                    is_error: false,
                                });
                            }
                            (BatchExecutionResult::Success, output.rows_affected)
                        }
                        BatchOutcome::Completed(Err(BatchError::Cancelled))
                        | BatchOutcome::Cancelled => (BatchExecutionResult::Cancel, None),
                        BatchOutcome::Completed(Err(e)) => {
                            let _ = events.send(ExecutionEvent::BatchMessage {
                                batch_index,
                                message: e.to_string(),
                                is_error: true,
                            });
                            (BatchExecutionResult::Failure, None)
                        }
                        BatchOutcome::TimedOut => {
                            let _ = events.send(ExecutionEvent::BatchMessage {
                                batch_index,
                                message: "Execution timeout expired".to_string(),
                                is_error: true,
                            });
                            (BatchExecutionResult::Timeout, None)
                        }
                    };

                let _ = events.send(ExecutionEvent::BatchFinished {
                    batch_index,
                    iteration,
                    result,
                    rows_affected,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });

                match result {
                    BatchExecutionResult::Success => {}
                    BatchExecutionResult::Cancel => {
                        return finish(events, ScriptExecutionResult::Cancel)
                    }
                    BatchExecutionResult::Timeout => {
                        return finish(events, ScriptExecutionResult::Timeout)
                    }
                    BatchExecutionResult::Failure => {
                        any_failed = true;
                        if halt {
                            return finish(events, ScriptExecutionResult::Halted);
                        }
                    }
                }
            }
        }

        let result = if any_failed {
            ScriptExecutionResult::Failure
        } else {
            ScriptExecutionResult::Success
        };
        finish(events, result)
    }

    async fn run_batch(
        &self,
        batch: &Batch,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let execution = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, self.executor.execute(batch, cancel))
                    .await
                    .map_err(|_| ()),
                None => Ok(self.executor.execute(batch, cancel).await),
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => BatchOutcome::Cancelled,
            outcome = execution => match outcome {
                Ok(result) => BatchOutcome::Completed(result),
                Err(()) => BatchOutcome::TimedOut,
            },
        }
    }
}

fn finish(
    events: &mpsc::UnboundedSender<ExecutionEvent>,
    result: ScriptExecutionResult,
) -> ScriptExecutionResult {
    tracing::debug!(?result, "script execution finished");
    let _ = events.send(ExecutionEvent::ScriptFinished { result });
    result
}

/// Handle to a script running on a background task.
#[derive(Clone)]
pub struct ExecutionHandle {
    cancel: CancellationToken,
    done: watch::Receiver<Option<ScriptExecutionResult>>,
}

impl ExecutionHandle {
    pub fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }

    /// The final result, if execution has finished.
    pub fn result(&self) -> Option<ScriptExecutionResult> {
        *self.done.borrow()
    }

    /// Wait for the script to finish.
    pub async fn wait(&self) -> ScriptExecutionResult {
        let mut done = self.done.clone();
        loop {
            if let Some(result) = *done.borrow_and_update() {
                return result;
            }
            if done.changed().await.is_err() {
                // Task ended without reporting (panic or runtime shutdown).
                return (*done.borrow()).unwrap_or(ScriptExecutionResult::Failure);
            }
        }
    }

    /// Request cancellation and wait until the engine has observed it.
    pub async fn cancel(&self) -> ScriptExecutionResult {
        self.cancel.cancel();
        self.wait().await
    }
}
