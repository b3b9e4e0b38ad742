//! Query execution feature service.

pub mod service;

pub use service::{
    ExecutorFactory, QueryExecutionService, QuerySession, UnconnectedExecutorFactory,
    QUERY_ALREADY_COMPLETED,
};
