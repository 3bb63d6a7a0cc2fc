//! The metrics HTTP endpoint `link run` exposes, grounded on the
//! teacher's `bark::stats::server` (`axum::Router` + `tokio::net::TcpListener`
//! spawned with `tokio::spawn`), reshaped to serve a JSON [`LinkStatus`]
//! snapshot instead of audio-stream metrics text.

use std::net::SocketAddr;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use structopt::StructOpt;
use thiserror::Error;

use crate::status::{LinkStatus, SharedStatus};

#[derive(StructOpt)]
pub struct MetricsOpt {
    #[structopt(long = "metrics-listen", env = "LINK_RUN_METRICS_LISTEN", default_value = "0.0.0.0:1530")]
    pub listen: SocketAddr,
}

#[derive(Debug, Error)]
#[error("starting metrics server: {0}")]
pub struct StartError(#[from] std::io::Error);

pub async fn start(opt: &MetricsOpt, status: SharedStatus) -> Result<(), StartError> {
    let app = Router::new().route("/metrics", get(metrics)).with_state(status);

    let listener = tokio::net::TcpListener::bind(&opt.listen).await?;
    log::info!("metrics server listening on {}", opt.listen);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            log::error!("metrics server stopped: {e}");
        }
    });

    Ok(())
}

async fn metrics(State(status): State<SharedStatus>) -> Json<LinkStatus> {
    let snapshot = *status.lock().expect("metrics mutex poisoned");
    Json(snapshot)
}
