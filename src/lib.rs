pub mod app;
pub mod blocklist;
pub mod commands;
pub mod db;
pub mod errors;
pub mod models;
pub mod reporter;
pub mod settings;
pub mod storage;
pub mod upload;
pub mod utils;

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use app::{data_dir_from_env, Stumbler};
use commands::{dispatch, parse_line, ReplySender};

async fn write_reply(stdout: &mut tokio::io::Stdout, reply: &Value) -> Result<()> {
    let mut out = serde_json::to_vec(reply)?;
    out.push(b'\n');
    stdout.write_all(&out).await?;
    stdout.flush().await?;
    Ok(())
}

async fn handle_line(stumbler: &Stumbler, line: &str, replies: &ReplySender) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let input = match parse_line(line) {
        Ok(input) => input,
        Err(err) => {
            warn!("{err:#}");
            return;
        }
    };
    if let Err(err) = dispatch(stumbler, input, replies).await {
        warn!("Command failed: {err:#}");
    }
}

/// Feeds newline-delimited JSON from stdin into the pipeline until EOF or
/// Ctrl-C, then flushes and shuts down. Replies are printed as they arrive,
/// so a manual upload never stalls the lines behind it.
async fn serve() -> Result<()> {
    let data_dir = data_dir_from_env();
    info!("Using data directory {}", data_dir.display());
    let stumbler = Stumbler::start(&data_dir)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    info!("Input closed");
                    break;
                };
                handle_line(&stumbler, &line, &reply_tx).await;
            }
            Some(reply) = reply_rx.recv() => write_reply(&mut stdout, &reply).await?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    let result = stumbler.shutdown().await;
    drop(reply_tx);
    while let Ok(reply) = reply_rx.try_recv() {
        write_reply(&mut stdout, &reply).await?;
    }
    result
}

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("Stumbler starting up...");

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
        .and_then(|runtime| runtime.block_on(serve()));

    if let Err(err) = result {
        error!("Stumbler failed: {err:#}");
        std::process::exit(1);
    }
}
