//! `kms-keytool`: wrap and unwrap data keys with AWS KMS master keys.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from `KEYTOOL_*` environment variables.
//! 2. Initialise structured JSON logging on stderr.
//! 3. Run the command named by the first argument, reading stdin and writing
//!    the result to stdout.

mod commands;
mod config;
mod telemetry;

use std::io::Read;

use anyhow::{Context, Result};
use tracing::info;

use commands::Command;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let command: Command = std::env::args()
        .nth(1)
        .context(commands::USAGE)?
        .parse()?;

    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: keytool configuration invalid: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cfg.log_level)?;
    info!(version = env!("CARGO_PKG_VERSION"), ?command, "kms-keytool starting");

    // -----------------------------------------------------------------------
    // 3. Command
    // -----------------------------------------------------------------------
    let output = match command {
        Command::Encrypt => commands::encrypt(&cfg, &read_stdin()?).await?,
        Command::Decrypt => commands::decrypt(&cfg, &read_stdin()?).await?,
        Command::CreateKey => commands::create_key(&cfg).await?,
    };
    println!("{output}");
    Ok(())
}

fn read_stdin() -> Result<String> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read stdin")?;
    Ok(input)
}
