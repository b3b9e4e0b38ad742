//! Query execution: runs GO-separated scripts per owner URI and streams
//! batch progress back to the client.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqltools_batch::{
    BatchExecutionResult, BatchExecutor, ExecutionEngine, ExecutionEvent, ExecutionHandle,
    ExecutionOptions,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::hosting::{HostedService, ServiceHost};
use crate::protocol::{EventContext, HandlerOptions};
use crate::session::SessionManager;
use crate::types::query::{
    self, BatchEventParams, BatchSummary, ExecuteRequestResult, ExecuteStringParams,
    MessageParams, QueryCancelResult, QueryCompleteParams, QueryDisposeResult, ResultMessage,
};
use crate::types::{service_error_codes, FeatureMetadata, ServiceError, ServiceResult};

/// Message returned when cancelling a query that has already finished.
pub const QUERY_ALREADY_COMPLETED: &str = "The query has already completed, it cannot be cancelled";

/// Supplies a batch executor for the connection behind an owner URI.
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    async fn executor_for(&self, owner_uri: &str) -> ServiceResult<Arc<dyn BatchExecutor>>;
}

/// Factory for a host with no connection service: every lookup fails.
pub struct UnconnectedExecutorFactory;

#[async_trait]
impl ExecutorFactory for UnconnectedExecutorFactory {
    async fn executor_for(&self, owner_uri: &str) -> ServiceResult<Arc<dyn BatchExecutor>> {
        Err(ServiceError::ConnectionNotFound(owner_uri.to_string()))
    }
}

/// One submitted script.
pub struct QuerySession {
    pub query: String,
    pub submitted_at: DateTime<Utc>,
    handle: ExecutionHandle,
}

impl QuerySession {
    pub fn handle(&self) -> &ExecutionHandle {
        &self.handle
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

pub struct QueryExecutionService {
    sessions: Arc<SessionManager<QuerySession>>,
    factory: Arc<dyn ExecutorFactory>,
    options: ExecutionOptions,
}

impl QueryExecutionService {
    pub fn new(factory: Arc<dyn ExecutorFactory>, options: ExecutionOptions) -> Self {
        Self {
            sessions: Arc::new(SessionManager::new()),
            factory,
            options,
        }
    }

    pub fn sessions(&self) -> Arc<SessionManager<QuerySession>> {
        Arc::clone(&self.sessions)
    }

    /// Start `params.query` in the background. Returns the receiver that
    /// carries its progress.
    pub async fn start_query(
        &self,
        params: &ExecuteStringParams,
    ) -> ServiceResult<mpsc::UnboundedReceiver<ExecutionEvent>> {
        let owner_uri = params.owner_uri.as_str();
        if let Some(existing) = self.sessions.get(owner_uri) {
            if existing.is_running() {
                return Err(ServiceError::handler(
                    service_error_codes::SESSION_ALREADY_EXISTS,
                    format!("A query is already executing for {owner_uri}"),
                ));
            }
        }

        let executor = self.factory.executor_for(owner_uri).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle =
            ExecutionEngine::new(executor).spawn(params.query.clone(), self.options.clone(), tx);

        tracing::info!("Executing query for {owner_uri}");
        self.sessions.insert_or_replace(
            owner_uri,
            QuerySession {
                query: params.query.clone(),
                submitted_at: Utc::now(),
                handle,
            },
        );
        Ok(rx)
    }

    pub async fn cancel(&self, owner_uri: &str) -> ServiceResult<QueryCancelResult> {
        let session = self
            .sessions
            .get(owner_uri)
            .ok_or_else(|| ServiceError::SessionNotFound(owner_uri.to_string()))?;

        if !session.is_running() {
            return Ok(QueryCancelResult {
                messages: Some(QUERY_ALREADY_COMPLETED.to_string()),
            });
        }

        let result = session.handle().cancel().await;
        tracing::info!("Query for {owner_uri} cancelled ({result:?})");
        Ok(QueryCancelResult::default())
    }

    pub async fn dispose(&self, owner_uri: &str) -> ServiceResult<()> {
        let session = self.sessions.remove(owner_uri)?;
        if session.is_running() {
            session.handle().cancel().await;
        }
        tracing::debug!("Disposed query for {owner_uri}");
        Ok(())
    }

    /// Drop finished queries untouched for `max_idle`.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<String> {
        self.sessions
            .evict_idle_if(max_idle, |session| !session.is_running())
    }

    /// Periodically evict idle finished queries until `shutdown` trips.
    pub fn spawn_eviction(
        &self,
        interval: Duration,
        max_idle: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        self.sessions
            .spawn_eviction_if(interval, max_idle, shutdown, |session| !session.is_running())
    }
}

impl HostedService for QueryExecutionService {
    fn name(&self) -> &'static str {
        "query"
    }

    fn register(self: Arc<Self>, host: &ServiceHost) -> ServiceResult<()> {
        host.add_feature(FeatureMetadata::enabled("query"));

        let service = Arc::clone(&self);
        host.set_request_handler(
            &query::EXECUTE_STRING,
            HandlerOptions::default(),
            move |params: ExecuteStringParams, ctx| {
                let service = Arc::clone(&service);
                async move {
                    let progress = service.start_query(&params).await?;
                    let events = ctx.events();
                    ctx.send_result(ExecuteRequestResult::default())?;
                    tokio::spawn(forward_events(params.owner_uri, progress, events));
                    Ok(())
                }
            },
        )?;

        let service = Arc::clone(&self);
        host.set_request_handler(&query::CANCEL, HandlerOptions::parallel(), move |params, ctx| {
            let service = Arc::clone(&service);
            async move { ctx.send_result(service.cancel(&params.owner_uri).await?) }
        })?;

        let service = Arc::clone(&self);
        host.set_request_handler(&query::DISPOSE, HandlerOptions::parallel(), move |params, ctx| {
            let service = Arc::clone(&service);
            async move {
                service.dispose(&params.owner_uri).await?;
                ctx.send_result(QueryDisposeResult::default())
            }
        })?;

        let sessions = self.sessions();
        host.register_shutdown_task(move |_| {
            let sessions = Arc::clone(&sessions);
            async move {
                for owner_uri in sessions.keys() {
                    if let Ok(session) = sessions.remove(&owner_uri) {
                        if session.is_running() {
                            session.handle().cancel().await;
                        }
                    }
                }
                Ok(())
            }
        });

        Ok(())
    }
}

/// Turn engine progress into `query/*` events until the script finishes.
async fn forward_events(
    owner_uri: String,
    mut progress: mpsc::UnboundedReceiver<ExecutionEvent>,
    events: EventContext,
) {
    let mut summaries: BTreeMap<usize, BatchSummary> = BTreeMap::new();

    while let Some(event) = progress.recv().await {
        let sent = match event {
            ExecutionEvent::BatchStarted {
                batch_index, batch, ..
            } => {
                let summary = BatchSummary {
                    id: batch_index,
                    selection: (&batch).into(),
                    execution_start: Utc::now(),
                    execution_end: None,
                    execution_elapsed_ms: None,
                    has_error: false,
                    rows_affected: None,
                };
                summaries.insert(batch_index, summary.clone());
                events.send_event(
                    &query::BATCH_START,
                    BatchEventParams {
                        owner_uri: owner_uri.clone(),
                        batch_summary: summary,
                    },
                )
            }
            ExecutionEvent::BatchMessage {
                batch_index,
                message,
                is_error,
            } => {
                let batch_id = match summaries.get_mut(&batch_index) {
                    Some(summary) => {
                        summary.has_error |= is_error;
                        Some(batch_index)
                    }
                    None => None,
                };
                events.send_event(
                    &query::MESSAGE,
                    MessageParams {
                        owner_uri: owner_uri.clone(),
                        message: ResultMessage {
                            batch_id,
                            is_error,
                            time: Utc::now(),
                            message,
                        },
                    },
                )
            }
            ExecutionEvent::BatchFinished {
                batch_index,
                result,
                rows_affected,
                elapsed_ms,
                ..
            } => {
                let Some(summary) = summaries.get_mut(&batch_index) else {
                    continue;
                };
                summary.execution_end = Some(Utc::now());
                summary.execution_elapsed_ms = Some(elapsed_ms);
                summary.has_error |= result != BatchExecutionResult::Success;
                summary.rows_affected = rows_affected;
                events.send_event(
                    &query::BATCH_COMPLETE,
                    BatchEventParams {
                        owner_uri: owner_uri.clone(),
                        batch_summary: summary.clone(),
                    },
                )
            }
            ExecutionEvent::ScriptFinished { result } => events.send_event(
                &query::COMPLETE,
                QueryCompleteParams {
                    owner_uri: owner_uri.clone(),
                    batch_summaries: summaries.values().cloned().collect(),
                    result,
                },
            ),
        };

        if let Err(e) = sent {
            tracing::debug!("Stopped forwarding query events for {owner_uri}: {e}");
            break;
        }
    }
}
