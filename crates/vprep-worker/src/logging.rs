//! Tracing setup and structured stage logging.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// Honours `RUST_LOG`; `LOG_FORMAT=json` switches to JSON lines. Calling it
/// twice is harmless.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Logger for one pipeline stage of one asset.
///
/// Every line carries the URL hash and operation so a single asset can be
/// followed through cache, optimization and routing.
#[derive(Debug, Clone)]
pub struct StageLogger {
    url_hash: String,
    operation: &'static str,
}

impl StageLogger {
    /// `url_hash` is shortened to 12 characters.
    pub fn new(url_hash: &str, operation: &'static str) -> Self {
        Self {
            url_hash: url_hash.chars().take(12).collect(),
            operation,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(url_hash = %self.url_hash, operation = self.operation, "Stage started: {}", message);
    }

    pub fn log_progress(&self, message: &str) {
        info!(url_hash = %self.url_hash, operation = self.operation, "Stage progress: {}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(url_hash = %self.url_hash, operation = self.operation, "Stage warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(url_hash = %self.url_hash, operation = self.operation, "Stage error: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(url_hash = %self.url_hash, operation = self.operation, "Stage completed: {}", message);
    }

    pub fn url_hash(&self) -> &str {
        &self.url_hash
    }

    pub fn operation(&self) -> &str {
        self.operation
    }

    /// Span for instrumenting the whole stage.
    pub fn span(&self) -> Span {
        tracing::info_span!("stage", url_hash = %self.url_hash, operation = self.operation)
    }
}
