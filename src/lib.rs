#![doc = include_str!("../README.md")]

pub mod config;
pub mod conversation;
pub mod corpus;
pub mod driver;
pub mod exchange;
pub mod gemini;
pub mod http_request;
pub mod repl;
pub mod retry;
#[cfg(feature = "server")]
pub mod server;

use std::sync::Arc;

pub use gemini::{Content, Role};
pub use http_request::HttpRequest;

/// A Gemini API configuration.
#[derive(Clone, Debug)]
pub struct Api {
    /// The Gemini API key.
    api_key: Arc<str>,
    /// The default model to use for requests.
    default_model: Arc<str>,
    /// The API endpoint host (without protocol or path).
    endpoint_host: Arc<str>,
}

impl Api {
    /// Creates a new Gemini API instance.
    ///
    /// Requires a valid Gemini API key.
    pub fn new<S: Into<Arc<str>>>(api_key: S) -> Self {
        Self {
            api_key: api_key.into(),
            default_model: Arc::from(gemini::DEFAULT_MODEL),
            endpoint_host: Arc::from(gemini::DEFAULT_ENDPOINT_HOST),
        }
    }

    /// Sets the default model for requests.
    ///
    /// If not set, [`gemini::DEFAULT_MODEL`] will be used.
    pub fn default_model<S: Into<Arc<str>>>(mut self, model: S) -> Self {
        self.default_model = model.into();
        self
    }

    /// Sets the API endpoint host.
    ///
    /// If not set, [`gemini::DEFAULT_ENDPOINT_HOST`] will be used.
    pub fn endpoint_host<S: Into<Arc<str>>>(mut self, endpoint_host: S) -> Self {
        self.endpoint_host = endpoint_host.into();
        self
    }

    /// Creates the required headers for any API request.
    fn create_default_headers(&self) -> Vec<(&'static str, Arc<str>)> {
        vec![("content-type", Arc::from("application/json"))]
    }
}

/// Builder for `generateContent` requests.
#[derive(Debug, Default)]
pub struct GenerateRequestBuilder {
    /// The model to use for the request.
    ///
    /// If none is provided, the default model will be used.
    model: Option<String>,
    /// The system instruction for the conversation.
    system: Option<Arc<str>>,
    /// Sampling parameters.
    generation: Option<gemini::GenerationConfig>,
    /// Tools made available to the model.
    tools: Vec<gemini::Tool>,
    /// The turns to send.
    contents: im::Vector<Content>,
}

impl GenerateRequestBuilder {
    /// Creates a new request builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the model for the request.
    pub fn model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the system instruction for the request.
    pub fn system<S: Into<Arc<str>>>(mut self, system: S) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Sets the sampling parameters for the request.
    pub fn generation_config(mut self, generation: gemini::GenerationConfig) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Adds a tool to the request.
    pub fn tool(mut self, tool: gemini::Tool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Appends a turn to the request.
    pub fn push(mut self, content: Content) -> Self {
        self.contents.push_back(content);
        self
    }

    /// Constructs and appends a single-text turn to the request.
    pub fn push_message<S: Into<String>>(self, role: Role, text: S) -> Self {
        self.push(Content::from_text(role, text))
    }

    /// Replace all turns in the request with the given ones.
    pub fn set_contents(mut self, contents: im::Vector<Content>) -> Self {
        self.contents = contents;
        self
    }

    /// Builds the HTTP request.
    pub fn build(&self, api: &Api) -> HttpRequest {
        let model = self.model.as_deref().unwrap_or(&api.default_model);

        let body = gemini::GenerateBody {
            contents: &self.contents,
            tools: &self.tools,
            system_instruction: self
                .system
                .as_deref()
                .map(gemini::SystemInstruction::from_text),
            generation_config: self.generation.as_ref(),
        };

        HttpRequest {
            host: api.endpoint_host.to_string(),
            path: format!("/{}/models/{}:generateContent", gemini::API_VERSION, model),
            query: vec![(http_request::API_KEY_PARAM, api.api_key.clone())],
            method: "POST",
            headers: api.create_default_headers(),
            body: serde_json::to_string(&body).expect("failed to serialize request body"),
        }
    }
}

/// Any error this crate produces.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("corpus error: {0}")]
    Corpus(#[from] corpus::CorpusError),
    #[error("exchange failed: {0}")]
    Exchange(#[from] exchange::ExchangeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::{Api, GenerateRequestBuilder, gemini};

    #[test]
    fn builds_generate_content_request() {
        let api = Api::new("test-api-key");

        let http_request = GenerateRequestBuilder::new()
            .system("You are a data analyst.")
            .generation_config(gemini::GenerationConfig::default())
            .push_message(gemini::Role::User, "Hello!")
            .build(&api);

        assert_eq!(http_request.method, "POST");
        assert_eq!(
            http_request.path,
            "/v1beta/models/gemini-2.5-flash-preview-05-20:generateContent"
        );
        assert_eq!(http_request.host, "generativelanguage.googleapis.com");
        assert_eq!(http_request.query.len(), 1);
        assert_eq!(http_request.query[0].0, "key");
        assert_eq!(&*http_request.query[0].1, "test-api-key");

        let body: serde_json::Value = serde_json::from_str(&http_request.body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "Hello!"}]}],
                "systemInstruction": {"parts": [{"text": "You are a data analyst."}]},
                "generationConfig": {"temperature": 0.1, "topP": 0.8, "topK": 20}
            })
        );
    }

    #[test]
    fn model_and_host_overrides() {
        let api = Api::new("k")
            .default_model("gemini-2.0-flash")
            .endpoint_host("gemini.internal.example");

        let default_model = GenerateRequestBuilder::new().build(&api);
        assert_eq!(
            default_model.path,
            "/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(default_model.host, "gemini.internal.example");

        let explicit = GenerateRequestBuilder::new()
            .model("gemini-2.5-pro")
            .build(&api);
        assert_eq!(explicit.path, "/v1beta/models/gemini-2.5-pro:generateContent");
    }

    #[test]
    fn optional_fields_are_omitted() {
        let api = Api::new("k");
        let body = GenerateRequestBuilder::new()
            .push_message(gemini::Role::User, "hi")
            .build(&api)
            .body;

        assert_eq!(body, r#"{"contents":[{"role":"user","parts":[{"text":"hi"}]}]}"#);
    }

    #[test]
    fn search_tool_is_sent_when_enabled() {
        let api = Api::new("k");
        let body = GenerateRequestBuilder::new()
            .tool(gemini::Tool::GoogleSearch {})
            .build(&api)
            .body;

        assert!(body.contains(r#""tools":[{"google_search":{}}]"#));
    }
}
