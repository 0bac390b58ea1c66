//! Abstract HTTP request.
//!
//! The [`HttpRequest`] type represents an HTTP request that can (and should) be sent to the
//! Gemini API, without committing to a specific HTTP client.
//!
//! ## Features
//!
//! If the `reqwest`/`reqwest-blocking` feature is enabled, the [`HttpRequest`] type can be
//! converted to a [`reqwest::Request`] or [`reqwest::blocking::Request`] using the
//! `try_into_reqwest` or `try_into_reqwest_blocking` methods.

use std::{fmt, sync::Arc};

/// Query parameter carrying the API key. Redacted when displayed.
pub const API_KEY_PARAM: &str = "key";

/// HTTP request encapsulation.
///
/// This type represents an HTTP request. Supports pretty-printing the request as a string (through
/// the [`std::fmt::Display`] trait), in which case the API key is redacted.
///
/// Cloning is cheap for everything but the body, which holds the full conversation.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// Request host.
    pub host: String,
    /// Request path.
    pub path: String,
    /// Query parameters, not yet percent-encoded.
    pub query: Vec<(&'static str, Arc<str>)>,
    /// HTTP method.
    pub method: &'static str,
    /// Request headers.
    pub headers: Vec<(&'static str, Arc<str>)>,
    /// Request body.
    pub body: String,
}

impl HttpRequest {
    /// Renders the headers as a string.
    ///
    /// The returned string is suitable for use in an HTTP request unaltered. Does not include the
    /// `Host` header.
    pub fn render_headers(&self) -> String {
        self.headers
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v.as_ref()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Returns the path and query string, optionally redacting the API key.
    fn path_and_query(&self, redact: bool) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }

        let query = self
            .query
            .iter()
            .map(|(k, v)| {
                if redact && *k == API_KEY_PARAM {
                    format!("{}=<redacted>", k)
                } else {
                    format!("{}={}", k, v.as_ref())
                }
            })
            .collect::<Vec<_>>()
            .join("&");

        format!("{}?{}", self.path, query)
    }

    /// Size of the request body in bytes.
    pub fn body_len(&self) -> usize {
        self.body.len()
    }
}

impl fmt::Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {} HTTP/1.1", self.method, self.path_and_query(true))?;

        writeln!(f, "Host: {}", self.host)?;
        if !self.headers.is_empty() {
            writeln!(f, "{}", self.render_headers())?;
        }

        // Empty line between headers and body
        writeln!(f)?;

        write!(f, "{}", self.body)?;

        Ok(())
    }
}

#[cfg(feature = "reqwest")]
impl HttpRequest {
    /// Builds the full URL, with the query parameters percent-encoded.
    pub fn url(&self) -> Result<reqwest::Url, Box<dyn std::error::Error>> {
        let url_string = format!("https://{}{}", self.host, self.path);
        let mut url = reqwest::Url::parse(&url_string)?;
        if !self.query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(self.query.iter().map(|(k, v)| (*k, v.as_ref())));
        }
        Ok(url)
    }

    /// Converts this [`HttpRequest`] into a [`reqwest::Request`].
    pub fn try_into_reqwest(self) -> Result<reqwest::Request, Box<dyn std::error::Error>> {
        let method = reqwest::Method::from_bytes(self.method.as_bytes())?;
        let url = self.url()?;
        let mut request = reqwest::Request::new(method, url);

        *request.body_mut() = Some(self.body.into());

        let headers = request.headers_mut();
        for (key, value) in self.headers {
            let header_name = reqwest::header::HeaderName::from_bytes(key.as_bytes())?;
            let header_value = reqwest::header::HeaderValue::from_str(&value)?;
            headers.insert(header_name, header_value);
        }

        Ok(request)
    }
}

#[cfg(feature = "reqwest-blocking")]
impl HttpRequest {
    /// Converts this [`HttpRequest`] into a [`reqwest::blocking::Request`].
    pub fn try_into_reqwest_blocking(
        self,
    ) -> Result<reqwest::blocking::Request, Box<dyn std::error::Error>> {
        let method = reqwest::Method::from_bytes(self.method.as_bytes())?;
        let url = self.url()?;
        let mut request = reqwest::blocking::Request::new(method, url);

        *request.body_mut() = Some(self.body.into());

        let headers = request.headers_mut();
        for (key, value) in self.headers {
            let header_name = reqwest::header::HeaderName::from_bytes(key.as_bytes())?;
            let header_value = reqwest::header::HeaderValue::from_str(&value)?;
            headers.insert(header_name, header_value);
        }

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    fn sample_request() -> super::HttpRequest {
        super::HttpRequest {
            host: "generativelanguage.googleapis.com".to_string(),
            path: "/v1beta/models/gemini-2.5-flash-preview-05-20:generateContent".to_string(),
            query: vec![("key", Arc::from("test-key"))],
            method: "POST",
            headers: vec![("content-type", Arc::from("application/json"))],
            body: r#"{"contents":[{"role":"user","parts":[{"text":"Hello, world!"}]}]}"#
                .to_string(),
        }
    }

    #[test]
    fn display_redacts_api_key() {
        let rendered = sample_request().to_string();

        assert!(rendered.starts_with(
            "POST /v1beta/models/gemini-2.5-flash-preview-05-20:generateContent?key=<redacted> HTTP/1.1\n"
        ));
        assert!(rendered.contains("Host: generativelanguage.googleapis.com\n"));
        assert!(rendered.contains("content-type: application/json\n"));
        assert!(!rendered.contains("test-key"));
        assert!(rendered.ends_with("Hello, world!\"}]}]}"));
    }

    #[test]
    fn display_lists_every_header() {
        let mut request = sample_request();
        request.headers.push(("x-goog-api-client", Arc::from("corpus-chat")));

        let rendered = request.to_string();
        assert!(rendered.contains(
            "Host: generativelanguage.googleapis.com\ncontent-type: application/json\nx-goog-api-client: corpus-chat\n\n"
        ));

        request.headers.clear();
        assert!(
            request
                .to_string()
                .contains("Host: generativelanguage.googleapis.com\n\n{")
        );
    }

    #[test]
    fn render_headers_joins_lines() {
        let mut request = sample_request();
        request.headers.push(("x-goog-api-client", Arc::from("corpus-chat")));

        assert_eq!(
            request.render_headers(),
            "content-type: application/json\nx-goog-api-client: corpus-chat"
        );
    }

    #[cfg(feature = "reqwest")]
    #[test]
    fn test_http_request_to_reqwest_conversion() {
        let reqwest_request: reqwest::Request = sample_request()
            .try_into_reqwest()
            .expect("should convert successfully");

        assert_eq!(reqwest_request.method(), &reqwest::Method::POST);
        assert_eq!(
            reqwest_request.url().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-preview-05-20:generateContent?key=test-key"
        );

        let headers = reqwest_request.headers();
        assert_eq!(headers.get("content-type").unwrap(), "application/json");

        let body = reqwest_request.body().unwrap();
        let body_bytes = body.as_bytes().unwrap();
        let body_str = std::str::from_utf8(body_bytes).unwrap();
        assert!(body_str.contains("Hello, world!"));
    }

    #[cfg(feature = "reqwest")]
    #[test]
    fn query_values_are_percent_encoded() {
        let mut request = sample_request();
        request.query = vec![("key", Arc::from("a b&c"))];

        let url = request.url().expect("valid url");
        assert_eq!(url.query(), Some("key=a+b%26c"));
    }

    #[cfg(feature = "reqwest-blocking")]
    #[test]
    fn test_http_request_to_reqwest_blocking_conversion() {
        let reqwest_request: reqwest::blocking::Request = sample_request()
            .try_into_reqwest_blocking()
            .expect("should convert successfully");

        assert_eq!(reqwest_request.method(), &reqwest::Method::POST);
        assert_eq!(reqwest_request.url().query(), Some("key=test-key"));

        let body = reqwest_request.body().unwrap();
        let body_bytes = body.as_bytes().unwrap();
        let body_str = std::str::from_utf8(body_bytes).unwrap();
        assert!(body_str.contains("Hello, world!"));
    }
}
