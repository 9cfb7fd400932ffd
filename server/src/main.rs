use std::{fs::OpenOptions, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use ride_tracker_data_management::DataManager;
use server::{
    config::{self, ServerConfig},
    odometer_scan::{GeminiClient, OdometerReader},
    routes,
    server_state::ServerState,
};
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_dir = config::log_dir();
    std::fs::create_dir_all(&log_dir).with_context(|| format!("Failed to create log dir {:?}", log_dir))?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("server.log"))
        .context("Failed to open log file")?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("{}=trace,ride_tracker_lib=debug,ride_tracker_data_management=debug", env!("CARGO_CRATE_NAME")).into())
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file))
        .init();

    tracing::info!("Starting server...");

    let config = ServerConfig::load()?;

    let data_manager = match &config.database {
        Some(path) => DataManager::open(path).await,
        None => DataManager::start().await,
    }
    .context("Failed to open database")?;

    let odometer_reader = config
        .gemini_api_key
        .clone()
        .map(|key| Arc::new(GeminiClient::new(key, config.gemini_model.clone())) as Arc<dyn OdometerReader>);

    let server_state = Arc::new(ServerState {
        data_manager,
        cost: config.cost,
        odometer_reader,
    });

    let index = config.static_dir.join("index.html");
    let app = routes::router(server_state)
        .fallback_service(ServeDir::new(&config.static_dir).fallback(ServeFile::new(index)));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    match &config.tls {
        Some(tls) => {
            // configure certificate and private key used by https
            let rustls = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .context("Failed to load TLS certificate")?;

            tracing::info!("Listening on https://{}", addr);
            axum_server::bind_rustls(addr, rustls)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!("Listening on http://{}", listener.local_addr()?);
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}
