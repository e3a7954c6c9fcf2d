use std::path::PathBuf;
use std::sync::Arc;

use crate::checkpoint::{Checkpointer, MemorySaver, RedisSaver, DEFAULT_PREFIX};
use crate::error::{AgentError, Result};
use crate::ledger::{Ledger, DEFAULT_LEDGER_PATH};
use crate::llm::{GeminiChat, DEFAULT_BASE_URL, DEFAULT_MODEL};

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Settings shared by every subcommand. Each can also come from the environment.
#[derive(Debug, Clone, clap::Args)]
pub struct Settings {
    /// API key for the Gemini API (falls back to GEMINI_API_KEY)
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true, global = true)]
    pub google_api_key: Option<String>,

    /// Gemini model name
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL, global = true)]
    pub model: String,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.0, global = true)]
    pub temperature: f32,

    /// Base URL of the Gemini REST API
    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_BASE_URL, global = true)]
    pub gemini_base_url: String,

    /// Redis URL for graph checkpoints.
    /// Example: redis://127.0.0.1:6379
    #[arg(long, env = "REDIS_URL", default_value = DEFAULT_REDIS_URL, global = true)]
    pub redis_url: String,

    /// Keep checkpoints in memory instead of Redis
    #[arg(long, global = true)]
    pub no_redis: bool,

    /// Key prefix for checkpoints stored in Redis
    #[arg(long, env = "CHECKPOINT_PREFIX", default_value = DEFAULT_PREFIX, global = true)]
    pub checkpoint_prefix: String,

    /// Expire Redis checkpoints after this many seconds
    #[arg(long, env = "CHECKPOINT_TTL", global = true)]
    pub checkpoint_ttl: Option<u64>,

    /// Path of the SQLite ledger database
    #[arg(long = "ledger", env = "LEDGER_DB", default_value = DEFAULT_LEDGER_PATH, global = true)]
    pub ledger_path: PathBuf,
}

impl Settings {
    pub fn api_key(&self) -> Result<String> {
        self.google_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.trim().is_empty()))
            .ok_or_else(|| {
                AgentError::Config("GOOGLE_API_KEY is not set (or pass --google-api-key)".to_string())
            })
    }

    pub fn build_model(&self) -> Result<GeminiChat> {
        GeminiChat::new(
            self.api_key()?,
            self.model.clone(),
            &self.gemini_base_url,
            self.temperature,
        )
    }

    pub fn open_ledger(&self) -> Result<Ledger> {
        Ledger::open(&self.ledger_path)
    }

    pub async fn connect_checkpointer(&self) -> Result<Arc<dyn Checkpointer>> {
        if self.no_redis {
            tracing::info!("Using in-memory checkpoints");
            return Ok(Arc::new(MemorySaver::new()));
        }

        let client = redis::Client::open(self.redis_url.as_str()).map_err(|e| {
            AgentError::Config(format!("Invalid Redis URL '{}': {}", redact_url(&self.redis_url), e))
        })?;
        let conn = redis::aio::ConnectionManager::new(client).await.map_err(|e| {
            AgentError::Config(format!(
                "Cannot connect to '{}': {} (start Redis or pass --no-redis)",
                redact_url(&self.redis_url),
                e
            ))
        })?;

        tracing::info!(
            url = %redact_url(&self.redis_url),
            prefix = %self.checkpoint_prefix,
            "Connected to Redis checkpoint store"
        );
        Ok(Arc::new(
            RedisSaver::new(conn, self.checkpoint_prefix.clone()).with_ttl(self.checkpoint_ttl),
        ))
    }
}

pub fn redact_url(url_str: &str) -> String {
    match url::Url::parse(url_str) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => url_str.to_string(),
    }
}
