//! Sending a conversation to the API.
//!
//! An exchange takes a fully built [`HttpRequest`], sends it through a [`Transport`] (or
//! [`AsyncTransport`]) under a [`RetryPolicy`] and turns the final response into the model's text
//! or an [`ExchangeError`].
//!
//! Status handling:
//!
//! * `429` is retried by the policy; if the budget runs out the result is
//!   [`ExchangeError::RateLimited`].
//! * `400` fails immediately with [`ExchangeError::BadRequest`]. The API returns this for
//!   oversized payloads, which is the usual failure mode with a large corpus.
//! * Any other non-success status fails immediately with [`ExchangeError::Http`].
//! * A successful body without candidate text yields [`gemini::NO_RESPONSE_TEXT`].

use async_trait::async_trait;

use crate::{
    gemini,
    http_request::HttpRequest,
    retry::{Outcome, RetryPolicy, Status},
};

/// Status and body of a response, as returned by a transport.
#[derive(Clone, Debug, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new<S: Into<String>>(status: u16, body: S) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl Status for RawResponse {
    fn status(&self) -> u16 {
        self.status
    }
}

/// Failure to obtain any response at all.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not build request: {0}")]
    Build(String),
    #[error("request failed: {0}")]
    Send(String),
    #[error("could not read response body: {0}")]
    Body(String),
}

/// Why an exchange produced no text.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("rate limit still exceeded after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("API rejected the request (400), payload may be too large: {message}")]
    BadRequest { message: String },
    #[error("API returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("could not parse API response: {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// A blocking way of sending requests.
pub trait Transport {
    fn send(&self, request: &HttpRequest) -> Result<RawResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, request: &HttpRequest) -> Result<RawResponse, TransportError> {
        (**self).send(request)
    }
}

/// An async way of sending requests.
#[async_trait]
pub trait AsyncTransport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<RawResponse, TransportError>;
}

/// Performs a blocking exchange and returns the model's text.
pub fn exchange<T: Transport + ?Sized>(
    transport: &T,
    policy: &RetryPolicy,
    request: &HttpRequest,
) -> Result<String, ExchangeError> {
    tracing::debug!(bytes = request.body_len(), "sending request");
    let outcome = policy.run(|_| transport.send(request))?;
    interpret(outcome)
}

/// Performs an async exchange and returns the model's text.
pub async fn exchange_async<T: AsyncTransport + ?Sized>(
    transport: &T,
    policy: &RetryPolicy,
    request: &HttpRequest,
) -> Result<String, ExchangeError> {
    tracing::debug!(bytes = request.body_len(), "sending request");
    let outcome = policy.run_async(|_| transport.send(request)).await?;
    interpret(outcome)
}

fn interpret(outcome: Outcome<RawResponse>) -> Result<String, ExchangeError> {
    let response = match outcome {
        Outcome::Completed { value, .. } => value,
        Outcome::Exhausted { attempts, .. } => {
            return Err(ExchangeError::RateLimited { attempts });
        }
    };

    if response.is_success() {
        return Ok(gemini::extract_text(&response.body)?);
    }

    let message = error_message(&response.body);
    match response.status {
        400 => Err(ExchangeError::BadRequest { message }),
        status => Err(ExchangeError::Http { status, message }),
    }
}

/// Prefers the message of a structured API error, falls back to the raw body.
fn error_message(body: &str) -> String {
    match gemini::parse_api_error(body) {
        Some(error) => error.message,
        None => body.trim().to_owned(),
    }
}

/// Builds a blocking reqwest client with an optional per-request timeout.
#[cfg(feature = "reqwest-blocking")]
pub fn blocking_client(
    timeout: Option<std::time::Duration>,
) -> Result<reqwest::blocking::Client, TransportError> {
    let mut builder = reqwest::blocking::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|err| TransportError::Build(err.to_string()))
}

/// Builds an async reqwest client with an optional per-request timeout.
#[cfg(feature = "reqwest")]
pub fn async_client(
    timeout: Option<std::time::Duration>,
) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|err| TransportError::Build(err.to_string()))
}

#[cfg(feature = "reqwest-blocking")]
impl Transport for reqwest::blocking::Client {
    fn send(&self, request: &HttpRequest) -> Result<RawResponse, TransportError> {
        let request = request
            .clone()
            .try_into_reqwest_blocking()
            .map_err(|err| TransportError::Build(err.to_string()))?;

        let response = self
            .execute(request)
            .map_err(|err| TransportError::Send(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| TransportError::Body(err.to_string()))?;

        Ok(RawResponse { status, body })
    }
}

#[cfg(feature = "reqwest")]
#[async_trait]
impl AsyncTransport for reqwest::Client {
    async fn send(&self, request: &HttpRequest) -> Result<RawResponse, TransportError> {
        let request = request
            .clone()
            .try_into_reqwest()
            .map_err(|err| TransportError::Build(err.to_string()))?;

        let response = self
            .execute(request)
            .await
            .map_err(|err| TransportError::Send(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::Body(err.to_string()))?;

        Ok(RawResponse { status, body })
    }
}
