#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use futures::Stream;
use server::config::{CliArgs, ServerConfig};
use server::service::handler::SubmitterService;
use server::telemetry::{TelemetryProviders, init_telemetry};
use taskstream_core::proto::{FILE_DESCRIPTOR_SET, submitter_server::SubmitterServer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Connected;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = ServerConfig::try_from(CliArgs::parse())?;
    let providers = init_telemetry()?;

    #[cfg(feature = "tracing")]
    tracing::info!(
        "Serving on {} ({} workers, {} byte chunks)",
        config.server_addr,
        config.num_workers,
        config.data_chunk_max_size
    );

    let addr = config.server_addr.clone();
    let served = if config.uds {
        serve_uds(&addr, config).await
    } else {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        serve(TcpListenerStream::new(listener), config).await
    };

    flush_telemetry(providers);
    served
}

#[cfg(unix)]
async fn serve_uds(path: &str, config: ServerConfig) -> anyhow::Result<()> {
    let listener = tokio::net::UnixListener::bind(path)?;
    let served = serve(
        tokio_stream::wrappers::UnixListenerStream::new(listener),
        config,
    )
    .await;
    let _ = std::fs::remove_file(path);
    served
}

#[cfg(not(unix))]
async fn serve_uds(_path: &str, _config: ServerConfig) -> anyhow::Result<()> {
    anyhow::bail!("Unix domain sockets are not supported on this platform")
}

/// Serves the submitter, health and reflection services until a shutdown
/// signal arrives, then drains the submitter before returning.
async fn serve<I, IO, IE>(incoming: I, config: ServerConfig) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let (health, health_service) = tonic_health::server::health_reporter();
    health.set_serving::<SubmitterServer<SubmitterService>>().await;

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let service = SubmitterService::new(config);
    let submitter = SubmitterServer::new(service.clone())
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let shutdown = async move {
        wait_for_signal().await;
        health
            .set_not_serving::<SubmitterServer<SubmitterService>>()
            .await;
        if let Err(_e) = service.shutdown().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Submitter did not shut down cleanly: {_e}");
        }
    };

    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(ServiceBuilder::new().layer(cors).layer(GrpcWebLayer::new()))
        .add_service(health_service)
        .add_service(reflection)
        .add_service(submitter)
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await?;

    #[cfg(feature = "tracing")]
    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or, on unix, SIGTERM. A handler that cannot be
/// installed never fires.
async fn wait_for_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received");
}

#[allow(clippy::needless_pass_by_value)]
fn flush_telemetry(_providers: TelemetryProviders) {
    #[cfg(feature = "tracing")]
    {
        if let Err(err) = _providers.tracer_provider.shutdown() {
            eprintln!("Error shutting down tracer: {err:#?}");
        }
    }

    #[cfg(feature = "metrics")]
    {
        if let Err(err) = _providers.meter_provider.shutdown() {
            eprintln!("Error shutting down meter: {err:#?}");
        }
    }
}
