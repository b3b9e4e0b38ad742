//! Service hosting: lifecycle handlers and feature service composition.

pub mod provider;
pub mod service_host;

pub use provider::{HostedService, ServiceProvider};
pub use service_host::ServiceHost;
