use async_trait::async_trait;
use reqwest::{
    Client,
    header::{HeaderName, HeaderValue},
};
use thiserror::Error;

const USER_AGENT_HEADER: &str = "github-notifier/0.1";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Patch,
    Put,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Patch => "PATCH",
            Method::Put => "PUT",
        }
    }
}

/// Header list that keeps insertion order. Inserting an existing name
/// (case-sensitive) replaces its value in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Lookup ignores ASCII case, as HTTP header names do.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestBody {
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json_body(mut self, value: &serde_json::Value) -> Self {
        self.body = Some(RequestBody {
            content_type: "application/json".to_owned(),
            data: value.to_string().into_bytes(),
        });
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub length: usize,
    pub headers: Headers,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Failed(String),
    /// Failure value that is neither an error nor a message, kept as its
    /// debug rendering.
    #[error("Unexpected transport failure: {0}")]
    Opaque(String),
}

impl TransportError {
    pub fn opaque(value: &impl std::fmt::Debug) -> Self {
        TransportError::Opaque(format!("{value:?}"))
    }
}

/// Sends exactly one request. HTTP status codes are never treated as errors
/// here; only failing to get a response is.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder().user_agent(USER_AGENT_HEADER).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Patch => reqwest::Method::PATCH,
            Method::Put => reqwest::Method::PUT,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in request.headers.iter() {
            let (name, value) = header_pair(name, value)?;
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, body.content_type)
                .body(body.data);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str(), value);
            }
        }
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            length: body.len(),
            body,
            headers,
        })
    }
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), TransportError> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| TransportError::Failed(format!("Invalid header name {name:?}")))?;
    let value = HeaderValue::from_str(value).map_err(|_| TransportError::opaque(&value))?;
    Ok((name, value))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_keep_insertion_order_and_replace_in_place() {
        let mut headers = Headers::new();
        headers.insert("Accept", "a");
        headers.insert("Authorization", "b");
        headers.insert("Accept", "c");

        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(pairs, vec![("Accept", "c"), ("Authorization", "b")]);
    }

    #[test]
    fn header_names_are_unique_case_sensitively() {
        let mut headers = Headers::new();
        headers.insert("accept", "a");
        headers.insert("Accept", "b");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("ACCEPT"), Some("a"));
    }

    #[test]
    fn json_body_sets_content_type() {
        let request = HttpRequest::new(Method::Put, "https://example.test")
            .json_body(&serde_json::json!({ "read": true }));
        let body = request.body.expect("body");
        assert_eq!(body.content_type, "application/json");
        assert_eq!(body.data, br#"{"read":true}"#);
    }

    #[test]
    fn invalid_headers_are_rejected_before_sending() {
        assert!(header_pair("Accept", "application/json").is_ok());
        assert!(matches!(
            header_pair("Bad Name", "x"),
            Err(TransportError::Failed(message)) if message.contains("Bad Name")
        ));
        let err = header_pair("Authorization", "token\nsplit").unwrap_err();
        assert_eq!(err.to_string(), r#"Unexpected transport failure: "token\nsplit""#);
    }

    #[test]
    fn opaque_failures_render_their_value() {
        let err = TransportError::opaque(&42);
        assert_eq!(err.to_string(), "Unexpected transport failure: 42");
    }
}
