#![warn(clippy::nursery, clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use futures::stream::StreamExt;
use rand::prelude::StdRng;
use rand::SeedableRng;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::sync::watch;
use tokio::task;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::clock::SystemClock;
use crate::config::Opts;
use crate::engine::Engine;
use crate::http::{router, AppState};
use crate::store::{MemoryStore, PasteStore, RocksStore};

mod clock;
mod config;
mod engine;
mod http;
mod paste;
mod short_code;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let opts = Opts::parse();

    if opts.in_memory {
        info!("Keeping pastes in memory");
        return serve(opts, MemoryStore::new()).await;
    }

    info!(path = %opts.database.display(), "Opening database");
    let store = RocksStore::open(&opts.database)?;
    serve(opts, store).await
}

async fn serve<S: PasteStore + 'static>(opts: Opts, store: S) -> Result<()> {
    let state = Arc::new(AppState::new(
        Engine::new(store),
        Arc::new(SystemClock),
        opts.public_url.clone(),
        StdRng::from_entropy(),
    ));

    let (stop_tx, stop_rx) = watch::channel(());
    let reclaimer = task::spawn(reclaim(
        Arc::clone(&state),
        opts.reclaim_interval(),
        stop_rx,
    ));

    let signals = Signals::new(&[SIGINT, SIGTERM])?;
    let signals_handle = signals.handle();

    info!(address = %opts.bind, "Listening");
    axum::Server::bind(&opts.bind)
        .serve(router(state).into_make_service())
        .with_graceful_shutdown(shutdown(signals))
        .await?;

    signals_handle.close();
    // Dropping the sender is what stops the reclaimer.
    drop(stop_tx);
    reclaimer.await?;
    Ok(())
}

async fn shutdown(mut signals: Signals) {
    if let Some(signal) = signals.next().await {
        info!(signal, "Shutting down");
    }
}

/// Periodic clean-up task that deletes pastes nobody can read anymore.
async fn reclaim<S: PasteStore>(
    state: Arc<AppState<S>>,
    every: Duration,
    mut stop: watch::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = state.engine.reclaim(state.now()).await {
                    error!("Failed to reclaim pastes: {}", e);
                }
            }
            _ = stop.changed() => break,
        }
    }
}
