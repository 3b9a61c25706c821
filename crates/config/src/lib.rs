use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Persona handed to the language model as the system prompt on every
/// non-crisis turn.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a compassionate mental health assistant. Your goal is to provide emotional support, mindfulness tips,
and mental well-being advice. Always respond with kindness and encouragement.
If a user expresses severe distress (e.g., hopelessness, self-harm thoughts), recommend professional help instead of generic responses.
answer in 50 words or less unless asked.
";

/// Fixed reply returned instead of a model completion when a crisis keyword
/// is detected.
pub const DEFAULT_CRISIS_RESPONSE: &str = "\
💙 I'm really sorry you're feeling this way. You're not alone.
📞 Please reach out to a trusted friend, family member, or professional.
🆘 Find a mental health helpline here: https://findahelpline.com/";

pub const DEFAULT_CRISIS_KEYWORDS: &[&str] = &[
    "suicide",
    "hopeless",
    "self-harm",
    "end my life",
    "no reason to live",
    "can't go on",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP server listens on.  Overridden at runtime by
    /// the `MINDFUL_BIND` environment variable when set.
    pub bind: String,
    pub session_cookie: String,
    /// Idle sessions older than this are dropped on the next lookup.
    pub session_ttl_minutes: u64,
    /// Adds the `Secure` attribute to the session cookie.  Leave off for
    /// plain-HTTP local development.
    pub secure_cookies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".to_string(),
            session_cookie: "mindful_session".to_string(),
            session_ttl_minutes: 12 * 60,
            secure_cookies: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL for the Ollama API.  Overridden at runtime by the
    /// `OLLAMA_BASE_URL` environment variable when set.
    pub ollama_base_url: String,
    pub chat_model: String,
    pub system_prompt: String,
    /// Per-request timeout for model and embedding calls.  `0` waits forever.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            ollama_base_url: "http://localhost:11434".to_string(),
            chat_model: "echo-care".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            request_timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    /// Every vector returned by the embedding backend must have exactly this
    /// many components; per-user indexes are created with it.
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
            dimension: 768,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Root directory for per-user index and transcript files.  Overridden at
    /// runtime by `MINDFUL_DATA_DIR`.
    pub data_dir: String,
    /// Number of semantically similar past lines injected into each prompt.
    pub retrieval_top_k: usize,
    /// Number of most recent transcript lines injected into each prompt.
    pub recent_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            retrieval_top_k: 2,
            recent_window: 10,
        }
    }
}

impl MemoryConfig {
    pub fn index_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("indexes")
    }

    pub fn transcript_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("messages")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Case-insensitive substrings that route a message to the crisis reply.
    pub crisis_keywords: Vec<String>,
    pub crisis_response: String,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            crisis_keywords: DEFAULT_CRISIS_KEYWORDS
                .iter()
                .map(|keyword| (*keyword).to_string())
                .collect(),
            crisis_response: DEFAULT_CRISIS_RESPONSE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// redb database holding users and the chat log.
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "data/mindful.redb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// When non-empty, logs are also written to a daily rolling file here.
    pub log_dir: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub memory: MemoryConfig,
    pub safety: SafetyConfig,
    pub store: StoreConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(value) = non_empty_env("OLLAMA_BASE_URL") {
            self.llm.ollama_base_url = value;
        }
        if let Some(value) = non_empty_env("MINDFUL_BIND") {
            self.server.bind = value;
        }
        if let Some(value) = non_empty_env("MINDFUL_DATA_DIR") {
            self.memory.data_dir = value;
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

// ── Tests ────────────────────────────────────────────────────────────────────
