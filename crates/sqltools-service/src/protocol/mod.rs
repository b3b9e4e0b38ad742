//! JSON-RPC protocol handling: dispatch, replies and request correlation.

pub mod context;
pub mod host;
pub mod pending;
pub mod validator;

pub use context::{EventContext, MessageSender, RequestContext};
pub use host::{HandlerOptions, JsonRpcHost, WeakJsonRpcHost};
pub use pending::PendingRequests;
