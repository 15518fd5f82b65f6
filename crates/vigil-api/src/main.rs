//! vigil-server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) layered with
//! `VIGIL_*` environment variables, opens the SQLite store, and either
//! serves the trigger endpoint or runs the pipeline once and exits.
//!
//! # Trigger token hash
//!
//! To generate the argon2 PHC string for `trigger_token_hash`:
//!
//! ```text
//! vigil-server --hash-token
//! ```

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use chrono::NaiveDate;
use clap::Parser;
use rand_core::OsRng;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use vigil_api::{AppState, AuthConfig, ServerConfig};
use vigil_core::{cache::SystemClock, policy::PolicyStore};
use vigil_pipeline::Pipeline;
use vigil_store_sqlite::SqliteStore;

#[derive(Parser)]
#[command(author, version, about = "Vigil nightly enforcement server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a trigger secret entered on stdin and exit.
  #[arg(long)]
  hash_token: bool,

  /// Run the pipeline once, print the report, and exit.
  #[arg(long)]
  run_once: bool,

  /// Business date for `--run-once` (YYYY-MM-DD). Defaults to yesterday.
  #[arg(long, requires = "run_once")]
  date: Option<NaiveDate>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  if cli.hash_token {
    let token = read_stdin_line()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(token.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(ExitCode::SUCCESS);
  }

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("VIGIL")
        .prefix_separator("_")
        .separator("__"),
    )
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let store_path = server_cfg.resolved_store_path();
  let store = Arc::new(
    SqliteStore::open(&store_path)
      .await
      .with_context(|| format!("failed to open store at {store_path:?}"))?,
  );

  let clock = Arc::new(SystemClock);
  let policies = Arc::new(PolicyStore::new(
    store.clone(),
    server_cfg.policy_cache_ttl(),
    clock.clone(),
  ));
  let pipeline = Pipeline::new(store, policies, clock, server_cfg.pipeline_config());

  if cli.run_once {
    let date = cli.date.unwrap_or_else(|| pipeline.default_business_date());
    let report = pipeline.run(date).await;
    println!(
      "{}",
      serde_json::to_string_pretty(&report).context("failed to encode report")?
    );
    return Ok(if report.success { ExitCode::SUCCESS } else { ExitCode::FAILURE });
  }

  if server_cfg.trigger_token_hash.is_empty() {
    tracing::warn!("trigger_token_hash is not set; every trigger request will be rejected");
  }

  let state = AppState {
    pipeline,
    auth: Arc::new(AuthConfig { token_hash: server_cfg.trigger_token_hash.clone() }),
  };

  let app = vigil_api::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(ExitCode::SUCCESS)
}

/// Read one line from stdin without the trailing newline.
fn read_stdin_line() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  eprint!("Token: ");
  io::stderr().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\n', '\r']).to_string())
}
