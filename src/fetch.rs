use std::io::{self, Read};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use thiserror::Error;

use crate::error::MemorError;

/// Transport-level outcome of a single GET.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    #[error("Timeout")]
    Timeout,
    #[error("Connection error")]
    Connection(String),
    #[error("{0}")]
    Other(String),
}

impl FetchFailure {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchFailure::Timeout | FetchFailure::Connection(_))
    }
}

/// Status line, declared type and a streaming body. Nothing else of the response is used.
pub struct MediaResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Box<dyn Read>,
}

impl std::fmt::Debug for MediaResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

pub trait MediaSource {
    fn get(&self, url: &str) -> Result<MediaResponse, FetchFailure>;
}

impl<T: MediaSource + ?Sized> MediaSource for &T {
    fn get(&self, url: &str) -> Result<MediaResponse, FetchFailure> {
        (**self).get(url)
    }
}

#[derive(Clone)]
pub struct HttpMediaSource {
    client: Client,
}

impl HttpMediaSource {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self, MemorError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("memoreasy/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MemorError::Network(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|err| MemorError::Network(err.to_string()))?;
        Ok(Self { client })
    }
}

impl MediaSource for HttpMediaSource {
    fn get(&self, url: &str) -> Result<MediaResponse, FetchFailure> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| classify_request_error(&err))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Ok(MediaResponse {
            status,
            content_type,
            body: Box::new(response),
        })
    }
}

pub fn classify_request_error(err: &reqwest::Error) -> FetchFailure {
    if err.is_timeout() {
        FetchFailure::Timeout
    } else if err.is_connect() || err.is_request() || err.is_body() {
        FetchFailure::Connection(err.to_string())
    } else {
        FetchFailure::Other(err.to_string())
    }
}

/// Read errors while streaming a body are transport failures.
pub fn classify_read_error(err: &io::Error) -> FetchFailure {
    if err.kind() == io::ErrorKind::TimedOut {
        return FetchFailure::Timeout;
    }
    match err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
    {
        Some(inner) if inner.is_timeout() => FetchFailure::Timeout,
        _ => FetchFailure::Connection(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_timeouts_are_transient() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(classify_read_error(&err), FetchFailure::Timeout);

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let failure = classify_read_error(&reset);
        assert!(failure.is_transient());
        assert_eq!(failure.to_string(), "Connection error");
    }
}
