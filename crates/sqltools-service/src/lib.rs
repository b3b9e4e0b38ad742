//! SQL Tools Service host: JSON-RPC over Content-Length framed streams,
//! typed request dispatch, lifecycle handling and query execution.

pub mod config;
pub mod hosting;
pub mod protocol;
pub mod query;
pub mod session;
pub mod transport;
pub mod types;

pub use config::{resolve_log_file, HostOptions};
pub use hosting::{HostedService, ServiceHost, ServiceProvider};
pub use protocol::{EventContext, HandlerOptions, JsonRpcHost, RequestContext};
pub use query::{ExecutorFactory, QueryExecutionService, UnconnectedExecutorFactory};
pub use session::SessionManager;
pub use transport::Channel;
pub use types::{Message, ServiceError, ServiceResult};
