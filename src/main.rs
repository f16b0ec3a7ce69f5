mod classifier;
mod config;
mod error;
mod handlers;
mod models;
mod staging;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::classifier::{ClassifierOptions, OnnxClassifier};
use crate::config::Config;
use crate::handlers::{AppState, InferenceSlots};
use crate::staging::StagingArea;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::parse();
    info!("oncochat-ml-api v{}", env!("CARGO_PKG_VERSION"));

    // A classifier that cannot load must never serve.
    let classifier = OnnxClassifier::load(
        &config.model_path,
        ClassifierOptions {
            normalization: config.normalization,
            cancerous_index: usize::from(config.cancerous_index),
        },
    )
    .with_context(|| format!("loading model from {}", config.model_path.display()))?;

    let staging = StagingArea::new(config.staging_dir())
        .with_context(|| format!("preparing staging dir {}", config.staging_dir().display()))?;
    info!(staging_dir = %staging.dir().display(), "staging uploads");

    let state = web::Data::new(AppState {
        classifier: Arc::new(classifier),
        staging,
        inference_timeout: config.inference_timeout(),
        max_upload_bytes: config.max_upload_bytes,
        inference_slots: Arc::new(InferenceSlots::new(config.max_inflight_inferences)),
    });

    let addr = config.bind_addr();
    warn!("CORS allows any origin, method and header; restrict it before exposing this service");
    info!(%addr, "server listening");

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .bind(&addr)?
    .run()
    .await?;

    Ok(())
}
