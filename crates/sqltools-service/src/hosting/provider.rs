//! Feature service registration.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::types::ServiceResult;

use super::ServiceHost;

/// A feature service that plugs its handlers into a [`ServiceHost`].
pub trait HostedService: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn register(self: Arc<Self>, host: &ServiceHost) -> ServiceResult<()>;
}

/// Composition root: owns the feature services and the token that ends
/// their background work.
pub struct ServiceProvider {
    services: Vec<Arc<dyn HostedService>>,
    background: CancellationToken,
}

impl Default for ServiceProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceProvider {
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
            background: CancellationToken::new(),
        }
    }

    pub fn with_service(mut self, service: Arc<dyn HostedService>) -> Self {
        self.services.push(service);
        self
    }

    /// Cancelled when the host shuts down.
    pub fn background_token(&self) -> CancellationToken {
        self.background.clone()
    }

    pub fn service_names(&self) -> Vec<&'static str> {
        self.services.iter().map(|s| s.name()).collect()
    }

    /// Register every service with `host`, in the order they were added.
    pub fn register_all(&self, host: &ServiceHost) -> ServiceResult<()> {
        for service in &self.services {
            tracing::info!("Registering {} service", service.name());
            Arc::clone(service).register(host)?;
        }

        let background = self.background.clone();
        host.register_shutdown_task(move |_| {
            background.cancel();
            futures::future::ready(Ok(()))
        });
        Ok(())
    }
}
