//! Shared helpers for the integration tests: a framed client on the far end
//! of an in-memory duplex stream.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

use sqltools_batch::{
    Batch, BatchError, BatchExecutor, BatchOutput, BatchResult, CancellationToken, ExecutionOptions,
};
use sqltools_service::transport::MessageReader;
use sqltools_service::{
    Channel, ExecutorFactory, JsonRpcHost, QueryExecutionService, ServiceHost, ServiceProvider,
    ServiceResult,
};

pub const OWNER_URI: &str = "file:///scripts/test.sql";

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// The client side of a host under test.
pub struct Client {
    reader: MessageReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Client {
    /// Write `value` as a single Content-Length frame.
    pub async fn send(&mut self, value: Value) {
        let body = value.to_string();
        let frame = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
        self.send_raw(frame.as_bytes()).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn request(&mut self, id: Value, method: &str, params: Value) {
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
    }

    pub async fn event(&mut self, method: &str, params: Value) {
        self.send(json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await;
    }

    /// Next frame from the host, or `None` once it closes the channel.
    pub async fn try_recv(&mut self) -> Option<Value> {
        let frame = tokio::time::timeout(RECV_TIMEOUT, self.reader.read_frame())
            .await
            .expect("timed out waiting for the host")
            .unwrap();
        frame.map(|body| serde_json::from_str(&body).unwrap())
    }

    pub async fn recv(&mut self) -> Value {
        self.try_recv().await.expect("host closed the channel")
    }

    /// Read until the reply to `id` arrives; events seen on the way are returned too.
    pub async fn reply_to(&mut self, id: &Value) -> (Value, Vec<Value>) {
        let mut events = Vec::new();
        loop {
            let message = self.recv().await;
            if message.get("method").is_none() && message.get("id") == Some(id) {
                return (message, events);
            }
            events.push(message);
        }
    }

    /// Send a request and wait for its reply.
    pub async fn call(&mut self, id: Value, method: &str, params: Value) -> Value {
        self.request(id.clone(), method, params).await;
        self.reply_to(&id).await.0
    }

    /// Read events until one named `method` arrives, returning everything seen.
    pub async fn events_until(&mut self, method: &str) -> Vec<Value> {
        let mut seen = Vec::new();
        loop {
            let message = self.recv().await;
            let done = message["method"] == method;
            seen.push(message);
            if done {
                return seen;
            }
        }
    }
}

/// A host wired to the server end of a duplex stream, not yet started.
pub fn connect(parallel: bool) -> (ServiceHost, Client) {
    let (server, client) = tokio::io::duplex(64 * 1024);
    let (read, write) = tokio::io::split(server);
    let host = JsonRpcHost::new(Channel::from_streams(read, write).described("test duplex"))
        .with_parallel_processing(parallel);
    let service_host = ServiceHost::from_host(host).unwrap();

    let (read, write) = tokio::io::split(client);
    let client = Client {
        reader: MessageReader::new(read),
        writer: write,
    };
    (service_host, client)
}

/// Runs batches without a server: `WAITFOR` blocks until cancelled,
/// `RAISERROR` fails, anything else succeeds with one row.
pub struct ScriptedExecutor;

#[async_trait]
impl BatchExecutor for ScriptedExecutor {
    async fn execute(&self, batch: &Batch, cancel: &CancellationToken) -> BatchResult<BatchOutput> {
        if batch.text.contains("WAITFOR") {
            cancel.cancelled().await;
            return Err(BatchError::Cancelled);
        }
        if batch.text.contains("RAISERROR") {
            return Err(BatchError::Execution("Msg 50000, Level 16: boom".to_string()));
        }
        if let Some(text) = batch.text.trim().strip_prefix("PRINT ") {
            return Ok(BatchOutput::default().with_message(text.trim_matches('\'')));
        }
        Ok(BatchOutput::default().with_rows(1))
    }
}

pub struct ScriptedFactory;

#[async_trait]
impl ExecutorFactory for ScriptedFactory {
    async fn executor_for(&self, _owner_uri: &str) -> ServiceResult<Arc<dyn BatchExecutor>> {
        Ok(Arc::new(ScriptedExecutor))
    }
}

/// A started host with the query service registered.
pub fn query_host(factory: Arc<dyn ExecutorFactory>) -> (ServiceHost, Client, Arc<QueryExecutionService>) {
    let (host, client) = connect(true);
    let service = Arc::new(QueryExecutionService::new(factory, ExecutionOptions::default()));
    ServiceProvider::new()
        .with_service(service.clone())
        .register_all(&host)
        .unwrap();
    host.start().unwrap();
    (host, client, service)
}
