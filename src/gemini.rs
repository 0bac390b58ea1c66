//! Gemini API related types.
//!
//! This module contains the subset of the `generateContent` API that is required to hold a
//! conversation: turns made of text parts, a system instruction, generation parameters and the
//! optional search grounding tool.

use std::{fmt, fmt::Display};

use serde::{Deserialize, Serialize};

/// Default API endpoint host to use.
pub const DEFAULT_ENDPOINT_HOST: &str = "generativelanguage.googleapis.com";

/// Default model to use for requests.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-05-20";

/// API version path segment that is compatible with this module.
pub const API_VERSION: &str = "v1beta";

/// Text returned when a successful response does not contain any candidate text.
pub const NO_RESPONSE_TEXT: &str = "No response text found.";

/// The body of a request to the `generateContent` endpoint.
///
/// Usually it is better to use [`crate::GenerateRequestBuilder`] instead of constructing this
/// directly.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody<'a> {
    /// The full conversation history.
    pub contents: &'a im::Vector<Content>,
    /// Tools the model may use.
    #[serde(skip_serializing_if = "no_tools")]
    pub tools: &'a [Tool],
    /// The system instruction for the conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction<'a>>,
    /// Sampling parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<&'a GenerationConfig>,
}

fn no_tools(tools: &&[Tool]) -> bool {
    tools.is_empty()
}

/// System instruction, sent as a role-less content block.
#[derive(Debug, Serialize)]
pub struct SystemInstruction<'a> {
    pub parts: [TextRef<'a>; 1],
}

impl<'a> SystemInstruction<'a> {
    pub fn from_text(text: &'a str) -> Self {
        Self {
            parts: [TextRef { text }],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TextRef<'a> {
    pub text: &'a str,
}

/// A role in a conversation.
///
/// The API only knows about `user` and `model`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Message from the user.
    User,
    /// Message from the model.
    Model,
}

/// One turn of a conversation.
///
/// Iterating over a turn will yield its `parts`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Content {
    /// The role of the turn.
    pub role: Role,
    /// The text segments of the turn, in order.
    pub parts: Vec<Part>,
}

impl Content {
    /// Convenience function to construct a turn containing a single piece of text.
    pub fn from_text<S: Into<String>>(role: Role, text: S) -> Self {
        Self {
            role,
            parts: vec![Part::from_text(text)],
        }
    }

    /// Returns the text of the first part, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.parts.first().map(|part| part.text.as_str())
    }
}

impl IntoIterator for Content {
    type Item = Part;
    type IntoIter = std::vec::IntoIter<Part>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.into_iter()
    }
}

impl<'a> IntoIterator for &'a Content {
    type Item = &'a Part;
    type IntoIter = std::slice::Iter<'a, Part>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.iter()
    }
}

/// A text segment of a turn.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Part {
    pub text: String,
}

impl Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Part {
    /// Convenience function to construct a text part.
    pub fn from_text<S: Into<String>>(text: S) -> Self {
        Part { text: text.into() }
    }
}

/// Sampling parameters sent with every request.
///
/// Config files may use either `top_p` or the wire name `topP`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationConfig {
    pub temperature: f32,
    #[serde(alias = "top_p")]
    pub top_p: f32,
    #[serde(alias = "top_k")]
    pub top_k: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.8,
            top_k: 20,
        }
    }
}

/// A tool made available to the model.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// Grounding with Google Search. Serializes as `{"google_search": {}}`.
    GoogleSearch {},
}

/// Gemini API error.
///
/// The body returned alongside a non-success status code.
#[derive(Clone, Debug, thiserror::Error, Deserialize, Serialize)]
#[error("{status} ({code}): {message}")]
pub struct ApiError {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

/// Attempts to parse an error body, returns `None` if it does not have the expected shape.
pub fn parse_api_error(body: &str) -> Option<ApiError> {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error)
}

/// A response from the `generateContent` endpoint.
///
/// All fields are optional, a missing field results in [`NO_RESPONSE_TEXT`] rather than an
/// error.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// The content of a candidate. Unlike [`Content`], the role may be absent.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CandidatePart {
    #[serde(default)]
    pub text: Option<String>,
}

impl GenerateResponse {
    /// Returns the first text segment of the first candidate.
    pub fn first_text(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .first()?
            .text
            .as_deref()
    }

    /// Like [`GenerateResponse::first_text`], but falls back to [`NO_RESPONSE_TEXT`].
    pub fn into_text(self) -> String {
        self.first_text().unwrap_or(NO_RESPONSE_TEXT).to_owned()
    }
}

/// Deserializes a successful `generateContent` response body and extracts its text.
pub fn extract_text(json: &str) -> Result<String, serde_json::Error> {
    let response: GenerateResponse = serde_json::from_str(json)?;
    Ok(response.into_text())
}
