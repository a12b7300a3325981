//! HTTP seam used to run scripts on FTP-only targets.

use std::time::Duration;

use reqwest::blocking::Client;

use super::AccessError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Status and body of one response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body decoded as text.
    pub body: String,
}

impl HttpResponse {
    /// Whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Issues GET requests.
pub trait HttpFetcher {
    /// Fetches `url` with `query` appended.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Http`] when no response is received.
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse, AccessError>;
}

/// Blocking `reqwest` client.
#[derive(Clone, Debug)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    /// Builds a client with a five minute request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Http`] when the TLS backend cannot initialise.
    pub fn new() -> Result<Self, AccessError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AccessError::Http {
                url: String::new(),
                status: None,
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl HttpFetcher for ReqwestFetcher {
    fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse, AccessError> {
        let failure = |err: reqwest::Error| AccessError::Http {
            url: url.to_owned(),
            status: err.status().map(|status| status.as_u16()),
            message: err.to_string(),
        };
        let response = self.client.get(url).query(query).send().map_err(failure)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(failure)?;
        Ok(HttpResponse { status, body })
    }
}
