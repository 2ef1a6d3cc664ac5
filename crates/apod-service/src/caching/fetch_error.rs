use thiserror::Error;

/// An error that happens when fetching a payload from the remote service.
///
/// The error is cloneable so that the outcome of one coalesced upstream fetch can be handed to
/// every caller that joined it. Errors are never cached: the next request for the same payload
/// goes back to the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The payload could not be fetched, because of a bad status code, a connection problem or a
    /// timeout.
    ///
    /// The attached string describes the failure.
    #[error("network error: {0}")]
    Network(String),
    /// The payload was fetched successfully, but the response body is malformed.
    ///
    /// This covers invalid JSON metadata as well as image bytes that cannot be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl FetchError {
    /// A short, stable name for this kind of error, used to tag metrics.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::Decode(_) => "decode",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        // The url carries the api key, which must not end up in logs or error messages.
        let err = err.without_url();
        if err.is_timeout() {
            Self::Network("request timed out".into())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<image::ImageError> for FetchError {
    fn from(err: image::ImageError) -> Self {
        Self::Decode(err.to_string())
    }
}

/// The outcome of fetching a payload, either `Ok(T)` or the reason why it could not be fetched.
pub type FetchResult<T> = Result<T, FetchError>;
