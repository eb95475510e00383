//! Boot sequence of the gateway: source discovery, composition and the HTTP server.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use derivative::Derivative;
use displaydoc::Display;
use futures::FutureExt;
use futures::future;
use futures::future::try_join_all;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::sync::watch;

use crate::axum_factory::make_router;
use crate::configuration::Configuration;
use crate::configuration::ConfigurationError;
use crate::configuration::Source;
use crate::error::RouterError;
use crate::error::ServiceBuildError;
use crate::remote::RemoteSchema;
use crate::remote::SourceDescriptor;
use crate::services::StitchedServiceFactory;
use crate::stitching::merge;

type ShutdownFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Specifies when the HTTP server should gracefully shut down.
#[derive(Display, Derivative)]
#[derivative(Debug)]
#[non_exhaustive]
pub enum ShutdownSource {
    /// None
    None,

    /// Custom
    Custom(#[derivative(Debug = "ignore")] ShutdownFuture),

    /// CtrlC
    CtrlC,
}

impl ShutdownSource {
    async fn wait(self) {
        match self {
            ShutdownSource::None => future::pending::<()>().await,
            ShutdownSource::Custom(future) => future.await,
            ShutdownSource::CtrlC => {
                let ctrl_c = async {
                    if let Err(error) = tokio::signal::ctrl_c().await {
                        tracing::error!(%error, "failed to install the CTRL+C signal handler");
                        future::pending::<()>().await;
                    }
                };
                #[cfg(unix)]
                let terminate = async {
                    use tokio::signal::unix::SignalKind;
                    match tokio::signal::unix::signal(SignalKind::terminate()) {
                        Ok(mut signal) => {
                            signal.recv().await;
                        }
                        Err(error) => {
                            tracing::error!(%error, "failed to install the SIGTERM signal handler");
                            future::pending::<()>().await;
                        }
                    }
                };
                #[cfg(not(unix))]
                let terminate = future::pending::<()>();

                tokio::select! {
                    _ = ctrl_c => {},
                    _ = terminate => {},
                }
            }
        }
    }
}

/// Introspects every configured source, or reads its schema file.
pub(crate) async fn discover_sources(
    configuration: &Configuration,
) -> Result<Vec<RemoteSchema>, ServiceBuildError> {
    try_join_all(
        configuration
            .sources
            .iter()
            .map(|(name, source)| discover_source(name, source)),
    )
    .await
}

async fn discover_source(name: &str, source: &Source) -> Result<RemoteSchema, ServiceBuildError> {
    let descriptor = SourceDescriptor::from_config(name, source)?;
    match &source.schema_file {
        Some(path) => {
            let sdl = tokio::fs::read_to_string(path).await.map_err(|e| {
                ConfigurationError::CannotReadFile {
                    path: path.clone(),
                    error: e.to_string(),
                }
            })?;
            Ok(RemoteSchema::from_sdl(descriptor, &sdl)?)
        }
        None => Ok(RemoteSchema::introspect(descriptor).await?),
    }
}

/// Discovers the sources and composes the stitched schema.
pub(crate) async fn build_service_factory(
    configuration: Arc<Configuration>,
) -> Result<StitchedServiceFactory, ServiceBuildError> {
    let sources = discover_sources(&configuration).await?;
    let extensions: Vec<&str> = configuration
        .stitching
        .extensions
        .iter()
        .map(String::as_str)
        .collect();
    let schema = merge(sources, &extensions, configuration.bindings()?)?;
    let factory = StitchedServiceFactory::new(Arc::new(schema), configuration);

    let schema = factory.schema();
    tracing::info!(
        sources = schema.sources().count(),
        bindings = schema.bindings().count(),
        "stitched schema composed"
    );
    tracing::debug!(sdl = schema.sdl(), "stitched schema");
    Ok(factory)
}

async fn serve(
    configuration: Configuration,
    shutdown: ShutdownSource,
    shutdown_receiver: oneshot::Receiver<()>,
    listen_address: watch::Sender<Option<SocketAddr>>,
) -> Result<(), RouterError> {
    let configuration = Arc::new(configuration);
    let factory = build_service_factory(configuration.clone()).await?;
    let router = make_router(Arc::new(factory)).map_err(ServiceBuildError::from)?;

    let listener = TcpListener::bind(configuration.server.listen)
        .await
        .map_err(RouterError::ServerCreation)?;
    let address = listener.local_addr().map_err(RouterError::ServerCreation)?;
    tracing::info!(
        "GraphQL endpoint exposed at http://{}{}",
        address,
        configuration.server.graphql_path
    );
    if configuration.server.playground.enabled {
        tracing::info!(
            "playground available at http://{}{}",
            address,
            configuration.server.playground.path
        );
    }
    listen_address.send_replace(Some(address));

    let shutdown = async move {
        tokio::select! {
            _ = shutdown.wait() => {},
            _ = shutdown_receiver => {},
        }
        tracing::info!("shutting down");
    };
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(RouterError::Serve)?;
    tracing::info!("stopped");
    Ok(())
}

/// The gateway HTTP server, running in its own task.
///
/// Awaiting the handle waits until the server stops, either after a graceful shutdown or
/// because it could not start. Dropping it triggers a graceful shutdown.
pub struct RouterHttpServer {
    result: Pin<Box<dyn Future<Output = Result<(), RouterError>> + Send>>,
    listen_address: watch::Receiver<Option<SocketAddr>>,
    shutdown_sender: Option<oneshot::Sender<()>>,
}

#[buildstructor::buildstructor]
impl RouterHttpServer {
    /// Returns a builder to start the server in a separate Tokio task.
    ///
    /// * `.configuration(Configuration)` Required.
    /// * `.shutdown(ShutdownSource)` Optional, defaults to [`ShutdownSource::CtrlC`].
    #[builder(visibility = "pub", entry = "builder", exit = "start")]
    fn start(configuration: Configuration, shutdown: Option<ShutdownSource>) -> RouterHttpServer {
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let (address_sender, listen_address) = watch::channel(None);
        let result = tokio::spawn(serve(
            configuration,
            shutdown.unwrap_or(ShutdownSource::CtrlC),
            shutdown_receiver,
            address_sender,
        ))
        .map(|result| match result {
            Ok(result) => result,
            Err(error) => {
                tracing::error!(%error, "router task failed");
                Err(RouterError::Aborted)
            }
        })
        .boxed();

        RouterHttpServer {
            result,
            listen_address,
            shutdown_sender: Some(shutdown_sender),
        }
    }

    /// The bound address once the server accepts requests, `None` if it failed to start.
    pub async fn listen_address(&self) -> Option<SocketAddr> {
        let mut receiver = self.listen_address.clone();
        let address = receiver.wait_for(Option::is_some).await.ok()?;
        *address
    }

    /// Triggers and waits for a graceful shutdown.
    pub async fn shutdown(&mut self) -> Result<(), RouterError> {
        if let Some(sender) = self.shutdown_sender.take() {
            let _ = sender.send(());
        }
        (&mut self.result).await
    }
}

impl Drop for RouterHttpServer {
    fn drop(&mut self) {
        if let Some(sender) = self.shutdown_sender.take() {
            let _ = sender.send(());
        }
    }
}

impl Future for RouterHttpServer {
    type Output = Result<(), RouterError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.result.poll_unpin(cx)
    }
}
