//! Interactive command-line chat over a JSON corpus.
//!
//! ## Usage
//!
//! ```bash
//! GEMINI_API_KEY=... cargo run --bin corpus-chat -- corpus-chat.toml
//! ```
//!
//! The config file argument is optional. Logs go to stderr and are controlled with `RUST_LOG`.

use std::{
    env,
    io::{self, Write},
    path::PathBuf,
};

use corpus_chat::{
    Error,
    config::Config,
    corpus::Source,
    driver::Driver,
    exchange::{ExchangeError, blocking_client},
    repl::{self, write_response},
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let loaded = config.corpus_loader().load()?;
    match &loaded.source {
        Source::Cache => println!(
            "\n--- Corpus cache {} found, using it ---",
            config.cache_file.display()
        ),
        Source::Scan { included, skipped } => println!(
            "\n--- Combined {} file(s) into {} ({} skipped) ---",
            included.len(),
            config.cache_file.display(),
            skipped.len()
        ),
    }

    let client = blocking_client(config.request_timeout()).map_err(ExchangeError::from)?;

    let conversation = config.conversation(&loaded.blob);
    println!("\nSending corpus ({} bytes) to the model...", loaded.blob.len());
    let (mut driver, acknowledgement) =
        Driver::start(config.api()?, conversation, client, config.retry_policy())?;

    let mut stdout = io::stdout().lock();
    write_response(&mut stdout, "R E S P O N S E", &acknowledgement)?;
    stdout.flush()?;

    repl::run(&mut driver, io::stdin().lock(), stdout)?;

    Ok(())
}
