//! Runtime configuration.
//!
//! Settings come from an optional TOML file, then environment variables (a `.env` file in the
//! working directory is honored). Everything except the API key has a default.
//!
//! ```toml
//! gemini_api_key = "AIza..."          # or GEMINI_API_KEY
//! model = "gemini-2.5-flash-preview-05-20"
//! data_dir = "./json_corpus"
//! cache_file = "combined_json_cache.txt"
//! search_tool = false
//! listen = "0.0.0.0:8080"
//! max_sessions = 1000
//!
//! [generation]
//! temperature = 0.1
//! top_p = 0.8
//! top_k = 20
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 1000
//! ```

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    Api,
    conversation::Conversation,
    corpus::{CorpusBlob, CorpusLoader},
    gemini::{self, GenerationConfig, Tool},
    retry::RetryPolicy,
};

/// Server sessions kept in memory unless configured otherwise.
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "corpus-chat.toml";

pub const ENV_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_MODEL: &str = "CORPUS_CHAT_MODEL";
pub const ENV_DATA_DIR: &str = "CORPUS_CHAT_DATA_DIR";
pub const ENV_CACHE_FILE: &str = "CORPUS_CHAT_CACHE_FILE";
pub const ENV_LISTEN: &str = "CORPUS_CHAT_LISTEN";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a specialized data analyst AI with strict limitations.\n\n\
Rules:\n\
1. You can only answer questions using information from the dataset provided in the first turn of this conversation.\n\
2. If a question cannot be answered using only this dataset, say that it is not covered by the dataset.\n\
3. Do not use external knowledge, general knowledge, or information outside this dataset.\n\
4. Do not make assumptions or inferences beyond what is explicitly stated in the data.\n\
5. Simple greetings and small talk ('hello', 'how are you', 'who are you') may be answered politely and concisely.\n\n\
Your responses must be professional, concise, and formatted in Markdown. \
Cite specific data points from the dataset when answering data-related questions.";

const DEFAULT_INJECTION_INSTRUCTION: &str = "The following content is the complete and only dataset you are allowed to use. \
You must never answer questions using any information outside this dataset. \
If a question cannot be answered using only this data, you must refuse and state that the information is not in the provided dataset.\n\n\
However, you may respond politely to simple greetings or small talk in a friendly but concise way.\n\n\
Confirm receipt of this data and acknowledge that you will only use this data for all future questions.";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no API key configured; set {ENV_API_KEY} or `gemini_api_key` in the config file")]
    MissingApiKey,
    #[error("invalid listen address {value:?}: {source}")]
    InvalidListen {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },
}

/// Application configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Gemini API key. Prefer the `GEMINI_API_KEY` environment variable.
    pub gemini_api_key: Option<String>,
    pub model: String,
    pub endpoint_host: String,
    /// Directory scanned for `*.json` documents.
    pub data_dir: PathBuf,
    /// Cache file holding the combined corpus.
    pub cache_file: PathBuf,
    pub system_prompt: String,
    /// Text preceding the corpus in the first turn.
    pub injection_instruction: String,
    /// Enables Google Search grounding.
    pub search_tool: bool,
    /// Server listen address.
    pub listen: String,
    /// Per-request timeout for the HTTP client. No timeout if unset.
    pub request_timeout_secs: Option<u64>,
    /// Server sessions kept in memory; the least recently used is evicted beyond this.
    pub max_sessions: usize,
    pub generation: GenerationConfig,
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            model: gemini::DEFAULT_MODEL.to_owned(),
            endpoint_host: gemini::DEFAULT_ENDPOINT_HOST.to_owned(),
            data_dir: PathBuf::from("./json_corpus"),
            cache_file: PathBuf::from("combined_json_cache.txt"),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            injection_instruction: DEFAULT_INJECTION_INSTRUCTION.to_owned(),
            search_tool: false,
            listen: "0.0.0.0:8080".to_owned(),
            request_timeout_secs: None,
            max_sessions: DEFAULT_MAX_SESSIONS,
            generation: GenerationConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
        }
    }
}

impl Config {
    /// Loads `.env`, the config file and environment overrides.
    ///
    /// With no explicit path, [`DEFAULT_CONFIG_FILE`] is used if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Ok(env_file) = dotenvy::dotenv() {
            tracing::info!(path = %env_file.display(), "loaded environment from .env");
        }

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Applies overrides from a variable lookup, usually the process environment.
    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(key) = lookup(ENV_API_KEY) {
            self.gemini_api_key = Some(key);
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.model = model;
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup(ENV_CACHE_FILE) {
            self.cache_file = PathBuf::from(file);
        }
        if let Some(listen) = lookup(ENV_LISTEN) {
            self.listen = listen;
        }
    }

    /// Checks that the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_key()?;
        Ok(())
    }

    fn api_key(&self) -> Result<&str, ConfigError> {
        self.gemini_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    /// The API handle described by this configuration.
    pub fn api(&self) -> Result<Api, ConfigError> {
        Ok(Api::new(self.api_key()?)
            .default_model(self.model.as_str())
            .endpoint_host(self.endpoint_host.as_str()))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .max_attempts(self.retry.max_attempts)
            .base_delay(Duration::from_millis(self.retry.base_delay_ms))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|source| ConfigError::InvalidListen {
                value: self.listen.clone(),
                source,
            })
    }

    pub fn corpus_loader(&self) -> CorpusLoader {
        CorpusLoader::new(&self.data_dir, &self.cache_file)
    }

    /// A conversation seeded with `corpus`, carrying the configured prompt, sampling parameters
    /// and tools.
    pub fn conversation(&self, corpus: &CorpusBlob) -> Conversation {
        let mut conversation = Conversation::new();
        conversation
            .set_system(self.system_prompt.as_str())
            .set_generation(self.generation.clone())
            .seed(self.injection_instruction.as_str(), corpus);

        if self.search_tool {
            conversation.add_tool(Tool::GoogleSearch {});
        }

        conversation
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use super::{Config, ConfigError};
    use crate::corpus::CorpusBlob;

    #[test]
    fn defaults_without_file() {
        let config = Config::default();

        assert_eq!(config.model, "gemini-2.5-flash-preview-05-20");
        assert_eq!(config.cache_file.to_str(), Some("combined_json_cache.txt"));
        assert!(!config.search_tool);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry_policy().base_delay, Duration::from_secs(1));
        assert_eq!(config.max_sessions, 1000);
        assert!(matches!(config.validate(), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn parses_partial_toml() {
        let config = Config::from_toml(
            r#"
gemini_api_key = "file-key"
data_dir = "publications"
search_tool = true
request_timeout_secs = 30
max_sessions = 50

[generation]
temperature = 0.4
top_p = 0.9
top_k = 40

[retry]
max_attempts = 3
"#,
        )
        .unwrap();

        assert_eq!(config.gemini_api_key.as_deref(), Some("file-key"));
        assert_eq!(config.data_dir.to_str(), Some("publications"));
        assert!(config.search_tool);
        assert_eq!(config.generation.top_k, 40);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.max_sessions, 50);
        assert_eq!(config.model, "gemini-2.5-flash-preview-05-20");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::from_toml("gemini_key = \"typo\"").is_err());
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = Config::from_toml("gemini_api_key = \"file-key\"").unwrap();
        let env = HashMap::from([
            ("GEMINI_API_KEY", "env-key"),
            ("CORPUS_CHAT_LISTEN", "127.0.0.1:9000"),
            ("CORPUS_CHAT_MODEL", "  "),
        ]);

        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.gemini_api_key.as_deref(), Some("env-key"));
        assert_eq!(config.listen_addr().unwrap().port(), 9000);
        // Blank values are ignored.
        assert_eq!(config.model, "gemini-2.5-flash-preview-05-20");
    }

    #[test]
    fn blank_api_key_is_missing() {
        let config = Config::from_toml("gemini_api_key = \"   \"").unwrap();
        assert!(matches!(config.api(), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn invalid_listen_address() {
        let config = Config::from_toml("listen = \"localhost\"").unwrap();
        assert!(matches!(
            config.listen_addr(),
            Err(ConfigError::InvalidListen { .. })
        ));
    }

    #[test]
    fn conversation_uses_configured_prompts() {
        let config = Config::from_toml(
            r#"
gemini_api_key = "k"
system_prompt = "Answer from the NASA bioscience publications only."
injection_instruction = "Here is the data."
search_tool = true
"#,
        )
        .unwrap();

        let conversation = config.conversation(&CorpusBlob::from("[]"));
        let request = conversation.request(&config.api().unwrap());
        let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();

        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "Answer from the NASA bioscience publications only."
        );
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Here is the data.");
        assert_eq!(body["tools"][0], serde_json::json!({"google_search": {}}));
        assert!(conversation.is_seeded());
    }
}
