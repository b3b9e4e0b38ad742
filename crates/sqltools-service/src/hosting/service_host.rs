//! The service host: lifecycle requests on top of a [`JsonRpcHost`].

use std::future::Future;
use std::sync::{Arc, RwLock};

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::{EventContext, HandlerOptions, JsonRpcHost, RequestContext};
use crate::transport::Channel;
use crate::types::{
    CapabilitiesResult, DmpServerCapabilities, EventType, FeatureMetadata, InitializeParams,
    InitializeResult, RequestType, ServerCapabilities, ServiceResult, CAPABILITIES, EXIT,
    INITIALIZE, SERVICE_VERSION, SHUTDOWN, VERSION,
};

type InitializeCallback =
    Arc<dyn Fn(InitializeParams, EventContext) -> BoxFuture<'static, ServiceResult<()>> + Send + Sync>;
type ShutdownCallback =
    Arc<dyn Fn(EventContext) -> BoxFuture<'static, ServiceResult<()>> + Send + Sync>;

#[derive(Default)]
struct Lifecycle {
    initialize: RwLock<Vec<InitializeCallback>>,
    shutdown: RwLock<Vec<ShutdownCallback>>,
    capabilities: RwLock<ServerCapabilities>,
    features: RwLock<Vec<FeatureMetadata>>,
}

impl Lifecycle {
    fn initialize_callbacks(&self) -> Vec<InitializeCallback> {
        self.initialize
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn shutdown_callbacks(&self) -> Vec<ShutdownCallback> {
        self.shutdown
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn capabilities(&self) -> ServerCapabilities {
        self.capabilities
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn features(&self) -> Vec<FeatureMetadata> {
        self.features
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

/// Hosts feature services on a JSON-RPC channel.
///
/// `initialize`, `shutdown`, `exit`, `version` and `capabilities/list` are
/// handled here; everything else is registered by feature services through
/// [`set_request_handler`](Self::set_request_handler) and
/// [`set_event_handler`](Self::set_event_handler).
#[derive(Clone)]
pub struct ServiceHost {
    host: JsonRpcHost,
    lifecycle: Arc<Lifecycle>,
}

impl ServiceHost {
    pub fn new(channel: Channel) -> ServiceResult<Self> {
        Self::from_host(JsonRpcHost::new(channel))
    }

    pub fn from_host(host: JsonRpcHost) -> ServiceResult<Self> {
        let service_host = Self {
            host,
            lifecycle: Arc::new(Lifecycle::default()),
        };
        service_host.register_builtins()?;
        Ok(service_host)
    }

    fn register_builtins(&self) -> ServiceResult<()> {
        let lifecycle = self.lifecycle.clone();
        self.host
            .set_request_handler(&INITIALIZE, HandlerOptions::default(), move |params, ctx| {
                let lifecycle = lifecycle.clone();
                async move { handle_initialize(&lifecycle, params, ctx).await }
            })?;

        let lifecycle = self.lifecycle.clone();
        self.host
            .set_request_handler(&SHUTDOWN, HandlerOptions::default(), move |(), ctx| {
                let lifecycle = lifecycle.clone();
                async move { handle_shutdown(&lifecycle, ctx).await }
            })?;

        let weak = self.host.downgrade();
        self.host
            .set_event_handler(&EXIT, HandlerOptions::default(), move |(), _ctx| {
                let weak = weak.clone();
                async move {
                    tracing::info!("Exit requested");
                    if let Some(host) = weak.upgrade() {
                        host.stop();
                    }
                    Ok(())
                }
            })?;

        self.host
            .set_request_handler(&VERSION, HandlerOptions::default(), |(), ctx| async move {
                ctx.send_result(SERVICE_VERSION.to_string())
            })?;

        let lifecycle = self.lifecycle.clone();
        self.host
            .set_request_handler(&CAPABILITIES, HandlerOptions::default(), move |params, ctx| {
                let features = lifecycle.features();
                async move {
                    tracing::info!(
                        "Capabilities requested by {} {}",
                        params.host_name.as_deref().unwrap_or("unknown host"),
                        params.host_version.as_deref().unwrap_or("")
                    );
                    ctx.send_result(CapabilitiesResult {
                        capabilities: DmpServerCapabilities::new(features),
                    })
                }
            })?;

        Ok(())
    }

    /// Run `callback` when `initialize` arrives, after earlier registrations.
    pub fn register_initialize_task<F, Fut>(&self, callback: F)
    where
        F: Fn(InitializeParams, EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<()>> + Send + 'static,
    {
        let callback: InitializeCallback =
            Arc::new(move |params: InitializeParams, events: EventContext| {
                callback(params, events).boxed()
            });
        self.lifecycle
            .initialize
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(callback);
    }

    /// Run `callback` when `shutdown` arrives, after earlier registrations.
    pub fn register_shutdown_task<F, Fut>(&self, callback: F)
    where
        F: Fn(EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<()>> + Send + 'static,
    {
        let callback: ShutdownCallback = Arc::new(move |events: EventContext| callback(events).boxed());
        self.lifecycle
            .shutdown
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(callback);
    }

    /// Capabilities returned from `initialize`.
    pub fn set_server_capabilities(&self, capabilities: ServerCapabilities) {
        *self
            .lifecycle
            .capabilities
            .write()
            .unwrap_or_else(|p| p.into_inner()) = capabilities;
    }

    pub fn server_capabilities(&self) -> ServerCapabilities {
        self.lifecycle.capabilities()
    }

    /// Advertise a feature through `capabilities/list`.
    pub fn add_feature(&self, feature: FeatureMetadata) {
        self.lifecycle
            .features
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(feature);
    }

    pub fn dmp_capabilities(&self) -> DmpServerCapabilities {
        DmpServerCapabilities::new(self.lifecycle.features())
    }

    pub fn set_request_handler<P, R, F, Fut>(
        &self,
        request: &RequestType<P, R>,
        options: HandlerOptions,
        handler: F,
    ) -> ServiceResult<()>
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P, RequestContext<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<()>> + Send + 'static,
    {
        self.host.set_request_handler(request, options, handler)
    }

    pub fn set_event_handler<P, F, Fut>(
        &self,
        event: &EventType<P>,
        options: HandlerOptions,
        handler: F,
    ) -> ServiceResult<()>
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P, EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<()>> + Send + 'static,
    {
        self.host.set_event_handler(event, options, handler)
    }

    pub async fn send_request<P, R>(&self, request: &RequestType<P, R>, params: P) -> ServiceResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.host.send_request(request, params).await
    }

    pub fn send_event<P: Serialize>(&self, event: &EventType<P>, params: P) -> ServiceResult<()> {
        self.host.send_event(event, params)
    }

    pub fn host(&self) -> &JsonRpcHost {
        &self.host
    }

    pub fn start(&self) -> ServiceResult<()> {
        self.host.start()
    }

    pub fn stop(&self) {
        self.host.stop();
    }

    pub async fn wait_for_exit(&self) {
        self.host.wait_for_exit().await;
    }
}

async fn handle_initialize(
    lifecycle: &Lifecycle,
    params: InitializeParams,
    ctx: RequestContext<InitializeResult>,
) -> ServiceResult<()> {
    tracing::info!(
        "Initializing for process {:?}, root {}",
        params.process_id,
        params
            .root_uri
            .as_deref()
            .or(params.root_path.as_deref())
            .unwrap_or("<none>")
    );

    for callback in lifecycle.initialize_callbacks() {
        callback(params.clone(), ctx.events()).await?;
    }

    ctx.send_result(InitializeResult {
        capabilities: lifecycle.capabilities(),
    })
}

async fn handle_shutdown(lifecycle: &Lifecycle, ctx: RequestContext<()>) -> ServiceResult<()> {
    tracing::info!("Shutdown requested");
    for callback in lifecycle.shutdown_callbacks() {
        callback(ctx.events()).await?;
    }
    ctx.send_result(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServiceError;
    use std::sync::Mutex;

    fn service_host() -> ServiceHost {
        let (ours, _theirs) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(ours);
        ServiceHost::new(Channel::from_streams(read, write)).unwrap()
    }

    #[tokio::test]
    async fn test_builtins_cannot_be_registered_twice() {
        let host = service_host();
        let err = host
            .set_request_handler(&VERSION, HandlerOptions::default(), |(), ctx| async move {
                ctx.send_result("other".to_string())
            })
            .unwrap_err();
        assert!(matches!(err, ServiceError::HandlerAlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn test_initialize_callbacks_run_in_order() {
        let host = service_host();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            host.register_initialize_task(move |_, _| {
                let order = order.clone();
                async move {
                    order.lock().unwrap().push(i);
                    Ok(())
                }
            });
        }

        let callbacks = host.lifecycle.initialize_callbacks();
        for callback in callbacks {
            callback(InitializeParams::default(), host.host().events())
                .await
                .unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_features_feed_capabilities() {
        let host = service_host();
        host.add_feature(FeatureMetadata::enabled("query"));
        let caps = host.dmp_capabilities();
        assert_eq!(caps.provider_name, "MSSQL");
        assert_eq!(caps.features.len(), 1);
        assert_eq!(caps.features[0].feature_name, "query");
    }
}
