use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use thiserror::Error;

use crate::audit::AuditLog;
use crate::config::{
    ConfigError, CorsConfig, ProxyConfig, DEFAULT_GEMINI_PATH, DEFAULT_HOST, DEFAULT_PORT,
};
use crate::executor::DEFAULT_ATTEMPT_TIMEOUT_SECS;
use crate::prompt::DEFAULT_MAX_PROMPT_CHARS;
use crate::router::{build_router, AppState};
use crate::telemetry::init_logging;

#[derive(Parser, Debug)]
#[command(name = "gemini-proxy")]
#[command(about = "OpenAI-compatible chat completion API backed by the Gemini CLI", version)]
pub struct Cli {
    /// Gemini CLI executable.
    #[arg(long, env = "GEMINI_PATH", default_value = DEFAULT_GEMINI_PATH)]
    pub gemini_path: PathBuf,

    #[arg(long, env = "HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Timeout for each CLI invocation attempt, in seconds.
    #[arg(long, env = "GEMINI_TIMEOUT", default_value_t = DEFAULT_ATTEMPT_TIMEOUT_SECS as f64)]
    pub gemini_timeout_secs: f64,

    /// JSON-lines audit log.
    #[arg(long, env = "LOG_FILE", default_value = "proxy.log")]
    pub log_file: PathBuf,

    #[arg(long, env = "NO_AUDIT_LOG")]
    pub no_audit_log: bool,

    /// Default log filter; `RUST_LOG` takes precedence.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Maximum length of a raw `prompt`, in characters.
    #[arg(long, env = "MAX_PROMPT_CHARS", default_value_t = DEFAULT_MAX_PROMPT_CHARS)]
    pub max_prompt_chars: usize,

    /// Drop known CLI banner lines (tips, session summaries) from output.
    #[arg(long, env = "GEMINI_STRIP_BANNERS")]
    pub strip_banner_phrases: bool,

    #[arg(long = "cors-allow-origin", env = "CORS_ALLOW_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub cors_allow_origin: Vec<String>,

    #[arg(long = "cors-allow-method", env = "CORS_ALLOW_METHODS", value_delimiter = ',', default_value = "*")]
    pub cors_allow_method: Vec<String>,

    #[arg(long = "cors-allow-header", env = "CORS_ALLOW_HEADERS", value_delimiter = ',', default_value = "*")]
    pub cors_allow_header: Vec<String>,

    #[arg(
        long = "cors-allow-credentials",
        env = "CORS_ALLOW_CREDENTIALS",
        action = ArgAction::Set,
        default_value_t = true
    )]
    pub cors_allow_credentials: bool,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server error: {0}")]
    Server(String),
}

impl Cli {
    pub fn to_config(&self) -> Result<ProxyConfig, CliError> {
        let attempt_timeout = Duration::try_from_secs_f64(self.gemini_timeout_secs)
            .ok()
            .filter(|timeout| !timeout.is_zero())
            .ok_or_else(|| ConfigError::InvalidTimeout(self.gemini_timeout_secs.to_string()))?;

        let mut config = ProxyConfig::new(&self.gemini_path);
        config.host = self.host.clone();
        config.port = self.port;
        config.attempt_timeout = attempt_timeout;
        config.max_prompt_chars = self.max_prompt_chars;
        config.strip_banner_phrases = self.strip_banner_phrases;
        config.audit_log = (!self.no_audit_log).then(|| self.log_file.clone());
        config.cors = CorsConfig {
            allow_origins: self.cors_allow_origin.clone(),
            allow_methods: self.cors_allow_method.clone(),
            allow_headers: self.cors_allow_header.clone(),
            allow_credentials: self.cors_allow_credentials,
        };
        Ok(config)
    }
}

pub fn run_gemini_proxy() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    let config = cli.to_config()?;
    run_server(config)
}

fn run_server(config: ProxyConfig) -> Result<(), CliError> {
    config.validate()?;

    let mut state = AppState::new(config.completion_service());
    if let Some(path) = &config.audit_log {
        state = state.with_audit_log(AuditLog::new(path));
    }
    let router = build_router(state).layer(config.cors.build_layer()?);

    let addr = config.bind_addr();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::Server(err.to_string()))?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(
            addr = %addr,
            gemini_path = %config.gemini_path.display(),
            attempt_timeout_secs = config.attempt_timeout.as_secs_f64(),
            audit_log = ?config.audit_log,
            "gemini-proxy listening"
        );
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|err| CliError::Server(err.to_string()))
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
