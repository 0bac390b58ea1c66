//! Conversation management for chats grounded in a corpus.
//!
//! A conversation is seeded with a single user turn that carries an instruction and the whole
//! [`CorpusBlob`]. The model's reply to that turn (the acknowledgement) is recorded like any other
//! reply. After that, a caller builds the request for a question with
//! [`Conversation::question_request`], which leaves the history untouched, and calls
//! [`Conversation::record_exchange`] once the model has answered. A failed or abandoned exchange
//! needs no cleanup.
//!
//! ## State management
//!
//! The Gemini API does not persist any state remotely, so every request carries the full history.
//! Turns are kept in an [`im::Vector`]: cloning a seeded conversation shares its (potentially very
//! large) first turn instead of copying it, which makes starting many conversations from one seed
//! cheap.
//!
//! The [`Conversation`] can be serialized and deserialized using [`serde`]. Additionally the
//! convenience [`Conversation::to_json`] and [`Conversation::from_json`] methods can be used.
//!
//! ## Example
//!
//! ```no_run
//! use corpus_chat::{Api, conversation::Conversation, corpus::CorpusBlob};
//!
//! let api = Api::new("AIza...");
//! let mut conversation = Conversation::new();
//! conversation
//!     .set_system("You are a data analyst.")
//!     .seed("Use only the following dataset.", &CorpusBlob::from(r#"[{"a": 1}]"#));
//!
//! let http_request = conversation.acknowledgement_request(&api);
//! // ... send http_request, extract the reply text ...
//! # let ack = String::from("Received.");
//! conversation.record_reply(ack);
//!
//! let http_request = conversation.question_request(&api, "What is a?");
//! // ... send http_request; only on success:
//! # let answer = String::from("1");
//! conversation.record_exchange("What is a?", answer);
//! ```

use std::{io, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    Api, GenerateRequestBuilder,
    corpus::CorpusBlob,
    gemini::{Content, GenerationConfig, Part, Role, Tool},
    http_request::HttpRequest,
};

/// Line preceding the corpus in the injection turn.
pub const DATA_START: &str = "--- DATA START ---";

/// Line following the corpus in the injection turn.
pub const DATA_END: &str = "--- DATA END ---";

/// A conversation that manages turn history and generates HTTP requests.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    /// The system instruction for the conversation.
    system: Option<Arc<str>>,
    /// Sampling parameters sent with every request.
    generation: Option<GenerationConfig>,
    /// Tools available for the model to use.
    tools: Vec<Tool>,
    /// The conversation's turn history.
    turns: im::Vector<Content>,
}

impl Conversation {
    /// Creates a new, empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the system instruction for the conversation.
    ///
    /// By default, no system instruction is sent.
    pub fn set_system<S: Into<Arc<str>>>(&mut self, system: S) -> &mut Self {
        self.system = Some(system.into());
        self
    }

    /// Sets the sampling parameters for the conversation.
    pub fn set_generation(&mut self, generation: GenerationConfig) -> &mut Self {
        self.generation = Some(generation);
        self
    }

    /// Adds a tool to the conversation.
    ///
    /// Tools are available to the model and will be included in all subsequent requests.
    pub fn add_tool(&mut self, tool: Tool) -> &mut Self {
        self.tools.push(tool);
        self
    }

    /// Replaces the history with the corpus injection turn.
    ///
    /// The turn holds two segments: the instruction, then the corpus framed by [`DATA_START`] and
    /// [`DATA_END`].
    pub fn seed<S: Into<String>>(&mut self, instruction: S, corpus: &CorpusBlob) -> &mut Self {
        let data = format!("{DATA_START}\n{corpus}\n{DATA_END}");
        self.turns = im::Vector::unit(Content {
            role: Role::User,
            parts: vec![Part::from_text(instruction), Part::from_text(data)],
        });
        self
    }

    /// Returns whether the conversation starts with an injection turn.
    pub fn is_seeded(&self) -> bool {
        self.turns.front().is_some_and(|turn| {
            turn.role == Role::User
                && turn
                    .parts
                    .last()
                    .is_some_and(|part| part.text.starts_with(DATA_START))
        })
    }

    /// Returns the request that sends only the injection turn.
    ///
    /// The reply is the model's acknowledgement of the corpus and should be passed to
    /// [`Conversation::record_reply`].
    pub fn acknowledgement_request(&self, api: &Api) -> HttpRequest {
        let seed = self.turns.front().cloned().into_iter().collect();
        self.request_for(api, seed)
    }

    /// Builds a request carrying the full history followed by `question`, without modifying the
    /// history.
    pub fn question_request(&self, api: &Api, question: &str) -> HttpRequest {
        let mut turns = self.turns.clone();
        turns.push_back(Content::from_text(Role::User, question));
        self.request_for(api, turns)
    }

    /// Appends a question together with the model's answer to it.
    pub fn record_exchange<Q: Into<String>, A: Into<String>>(&mut self, question: Q, answer: A) {
        self.turns.push_back(Content::from_text(Role::User, question));
        self.turns.push_back(Content::from_text(Role::Model, answer));
    }

    /// Builds a request carrying the full history, without modifying it.
    pub fn request(&self, api: &Api) -> HttpRequest {
        self.request_for(api, self.turns.clone())
    }

    fn request_for(&self, api: &Api, turns: im::Vector<Content>) -> HttpRequest {
        let mut builder = GenerateRequestBuilder::new().set_contents(turns);

        if let Some(ref system) = self.system {
            builder = builder.system(system.clone());
        }

        if let Some(ref generation) = self.generation {
            builder = builder.generation_config(generation.clone());
        }

        for tool in &self.tools {
            builder = builder.tool(tool.clone());
        }

        builder.build(api)
    }

    /// Appends the model's reply to the history.
    pub fn record_reply<S: Into<String>>(&mut self, text: S) {
        self.turns.push_back(Content::from_text(Role::Model, text));
    }

    /// Serializes the conversation to JSON using the provided writer.
    pub fn to_json<W: io::Write>(&self, writer: W) -> Result<(), serde_json::Error> {
        serde_json::to_writer(writer, self)
    }

    /// Deserializes a conversation from JSON using the provided reader.
    pub fn from_json<R: io::Read>(reader: R) -> Result<Self, serde_json::Error> {
        serde_json::from_reader(reader)
    }

    /// Returns the turn history.
    pub fn history(&self) -> &im::Vector<Content> {
        &self.turns
    }

    /// Number of turns, including the injection turn.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
