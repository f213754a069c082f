//! # Stratus Backend
//!
//! Web backend for student cloud deployments. HTTP handlers validate and
//! enqueue deployment work onto broker streams; consumer loops — one per
//! stream, all in this same process — drive the workloads to completion
//! and report status through the account store.
//!
//! The interesting machinery lives in the `pipeline` crate; this crate is
//! wiring: config, the redis connection, the axum router, and the spawn /
//! shutdown choreography around the consumer loops.

use std::time::Duration;

use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::post,
    Router,
};

use signal::{
    ctrl_c,
    unix::{signal, SignalKind},
};
use tokio::{net::TcpListener, signal, sync::watch, task::JoinHandle};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use pipeline::consumer::ConsumerLoop;
use pipeline::topics::Topic;

pub mod config;
pub mod database;
pub mod error;
pub mod routes;
pub mod state;

use routes::{
    submit_cluster_deployment_handler, submit_cluster_handler, submit_vm_deployment_handler,
    submit_vm_handler,
};
use state::State;

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new().await;

    info!("Starting consumer loops...");
    let (stop_tx, stop_rx) = watch::channel(false);
    let consumers = spawn_consumers(&state, &stop_rx);

    info!("Starting server...");

    let cors = CorsLayer::new()
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let app = Router::new()
        .route("/vms", post(submit_vm_handler))
        .route("/clusters", post(submit_cluster_handler))
        .route("/deployments/vms", post(submit_vm_deployment_handler))
        .route("/deployments/clusters", post(submit_cluster_deployment_handler))
        .layer(cors)
        .with_state(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.unwrap();
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    // Unacked entries stay pending on the broker; in-flight executors get
    // to finish before the process exits.
    info!("Stopping consumer loops...");
    let _ = stop_tx.send(true);
    for handle in consumers {
        let _ = handle.await;
    }

    println!("Server shutting down...");
}

fn spawn_consumers(
    state: &std::sync::Arc<State>,
    stop: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let block = Duration::from_millis(state.config.block_ms);

    Topic::ALL
        .into_iter()
        .map(|topic| {
            let consumer = ConsumerLoop::new(
                topic,
                state.broker.clone(),
                state.executor.clone(),
                state.accounts.clone(),
                format!("{}-{}", state.config.identity, topic.stream()),
                block,
                state.config.pool_size,
            );
            tokio::spawn(consumer.run(stop.clone()))
        })
        .collect()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
