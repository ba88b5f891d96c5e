use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },

    #[error("Unknown LLM provider: {0}")]
    UnknownProvider(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load `.env` from the working directory if one exists.
pub fn load_dotenv() {
    dotenv::dotenv().ok();
}

#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: usize,
    pub query_timeout: Duration,
}

impl Neo4jConfig {
    pub fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            uri: env_or("NEO4J_URI", "bolt://localhost:7687"),
            // NEO4J_USERNAME is what older deployments export
            user: env_first(&["NEO4J_USER", "NEO4J_USERNAME"]).unwrap_or_else(|| "neo4j".to_string()),
            password: env_or("NEO4J_PASSWORD", "password"),
            database: env_or("NEO4J_DATABASE", "neo4j"),
            max_connections: env_parse("NEO4J_MAX_CONNECTIONS", 10)?,
            query_timeout: Duration::from_secs(env_parse("NEO4J_QUERY_TIMEOUT_SECS", 30)?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Groq,
    Gemini,
    OpenAi,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "groq",
            LlmProvider::Gemini => "gemini",
            LlmProvider::OpenAi => "openai",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "llama-3.3-70b-versatile",
            LlmProvider::Gemini => "gemini-1.5-flash",
            LlmProvider::OpenAi => "gpt-4o-mini",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "https://api.groq.com/openai/v1",
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            LlmProvider::OpenAi => "https://api.openai.com/v1",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "GROQ",
            LlmProvider::Gemini => "GEMINI",
            LlmProvider::OpenAi => "OPENAI",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "groq" => Ok(LlmProvider::Groq),
            "gemini" => Ok(LlmProvider::Gemini),
            "openai" => Ok(LlmProvider::OpenAi),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn from_env() -> ConfigResult<Self> {
        let provider: LlmProvider = env_or("LLM_PROVIDER", "groq").parse()?;
        let prefix = provider.env_prefix();

        Ok(Self {
            provider,
            api_key: std::env::var(format!("{}_API_KEY", prefix)).ok().filter(|k| !k.is_empty()),
            model: std::env::var(format!("{}_MODEL", prefix))
                .unwrap_or_else(|_| provider.default_model().to_string()),
            base_url: env_first(&["LLM_BASE_URL", &format!("{}_BASE_URL", prefix)])
                .unwrap_or_else(|| provider.default_base_url().to_string()),
            temperature: env_parse("LLM_TEMPERATURE", 0.1)?,
            timeout: Duration::from_secs(env_parse("LLM_TIMEOUT_SECS", 60)?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub url: String,
    pub model: String,
    pub dimension: usize,
    pub timeout: Duration,
}

impl EmbeddingConfig {
    pub fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            url: env_or("EMBEDDING_URL", "http://localhost:8080"),
            model: env_or("EMBEDDING_MODEL", "sentence-transformers/all-MiniLM-L12-v2"),
            dimension: env_parse("EMBEDDING_DIMENSION", 384)?,
            timeout: Duration::from_secs(env_parse("LLM_TIMEOUT_SECS", 60)?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub default_k: usize,
    pub community_rating_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 40,
            default_k: 4,
            community_rating_threshold: 5.0,
        }
    }
}

impl RetrievalConfig {
    pub fn from_env() -> ConfigResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            chunk_size: env_parse("DEFAULT_CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: env_parse("DEFAULT_OVERLAP", defaults.chunk_overlap)?,
            default_k: env_parse("DEFAULT_K", defaults.default_k)?,
            community_rating_threshold: env_parse(
                "COMMUNITY_RATING_THRESHOLD",
                defaults.community_rating_threshold,
            )?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub neo4j: Neo4jConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
}

impl AppConfig {
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self {
            neo4j: Neo4jConfig::from_env()?,
            llm: LlmConfig::from_env()?,
            embedding: EmbeddingConfig::from_env()?,
            retrieval: RetrievalConfig::from_env()?,
        };

        tracing::debug!(
            neo4j_uri = %config.neo4j.uri,
            llm_provider = config.llm.provider.as_str(),
            llm_model = %config.llm.model,
            embedding_dimension = config.embedding.dimension,
            "Configuration loaded"
        );

        Ok(config)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
}

fn env_parse<T: FromStr>(key: &str, default: T) -> ConfigResult<T> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 9] = [
        "LLM_PROVIDER",
        "GEMINI_MODEL",
        "GEMINI_API_KEY",
        "LLM_BASE_URL",
        "DEFAULT_K",
        "NEO4J_USER",
        "NEO4J_USERNAME",
        "EMBEDDING_DIMENSION",
        "COMMUNITY_RATING_THRESHOLD",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_environment() {
        clear_env();
        let config = AppConfig::from_env().unwrap();

        assert_eq!(config.llm.provider, LlmProvider::Groq);
        assert_eq!(config.llm.model, "llama-3.3-70b-versatile");
        assert_eq!(config.embedding.dimension, 384);
        assert_eq!(config.retrieval.default_k, 4);
        assert_eq!(config.retrieval.chunk_size, 500);
        assert_eq!(config.retrieval.community_rating_threshold, 5.0);
        assert_eq!(config.neo4j.user, "neo4j");
    }

    #[test]
    #[serial]
    fn test_provider_selects_prefixed_settings() {
        clear_env();
        std::env::set_var("LLM_PROVIDER", "Gemini");
        std::env::set_var("GEMINI_MODEL", "gemini-1.5-pro");
        std::env::set_var("GEMINI_API_KEY", "k");

        let llm = LlmConfig::from_env().unwrap();
        assert_eq!(llm.provider, LlmProvider::Gemini);
        assert_eq!(llm.model, "gemini-1.5-pro");
        assert_eq!(llm.api_key.as_deref(), Some("k"));
        assert!(llm.base_url.contains("generativelanguage"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_legacy_username_variable() {
        clear_env();
        std::env::set_var("NEO4J_USERNAME", "reader");
        assert_eq!(Neo4jConfig::from_env().unwrap().user, "reader");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_number_is_reported() {
        clear_env();
        std::env::set_var("DEFAULT_K", "four");
        let err = RetrievalConfig::from_env().unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid { key: "DEFAULT_K".into(), value: "four".into() }
        );
        clear_env();
    }

    #[test]
    fn test_unknown_provider() {
        assert!(matches!(
            "mistral".parse::<LlmProvider>(),
            Err(ConfigError::UnknownProvider(_))
        ));
    }
}
