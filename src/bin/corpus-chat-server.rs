//! HTTP chat server over a JSON corpus.
//!
//! ## Usage
//!
//! ```bash
//! GEMINI_API_KEY=... cargo run --bin corpus-chat-server -- corpus-chat.toml
//! curl -X POST localhost:8080/chat -H 'content-type: application/json' \
//!     -d '{"message": "How many documents mention microgravity?"}'
//! ```

use std::{env, path::PathBuf, sync::Arc};

use corpus_chat::{
    Error,
    config::Config,
    exchange::{ExchangeError, async_client},
    server::{ServerState, router},
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    let addr = config.listen_addr()?;

    let loaded = config.corpus_loader().load()?;

    let client = async_client(config.request_timeout()).map_err(ExchangeError::from)?;

    let state = ServerState::start(
        config.api()?,
        config.conversation(&loaded.blob),
        Arc::new(client),
        config.retry_policy(),
    )
    .await?
    .max_sessions(config.max_sessions);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
