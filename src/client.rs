//! Outbound HTTP client shared by the verification strategies
//!
//! [`HttpClient`] wraps a single `reqwest::Client`. It builds requests with
//! an empty, form-encoded or JSON body, sends them, and returns the literal
//! upstream status (and optionally a decoded body) without interpreting it.
//! Deciding what a status means is left to the caller.
//!
//! Every exchange is dumped at debug level: the request as
//! `METHOD URL. Data: body` and the response with its status line, headers
//! and body. When the transport fails the response dump is empty.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, Request, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult, Result, TowerError};

/// Body of an outbound request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// No body
    Empty,
    /// `application/x-www-form-urlencoded` key/value pairs
    Form(Vec<(String, String)>),
    /// `application/json` document
    Json(serde_json::Value),
}

impl RequestBody {
    /// Form body from borrowed pairs
    pub fn form<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self::Form(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Shared outbound client
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    /// Build a client honouring the request timeout and TLS settings
    ///
    /// # Errors
    ///
    /// Returns [`TowerError::Http`] if the TLS backend cannot be initialised
    pub fn new(config: &AuthConfig) -> Result<Self> {
        if config.tls_insecure_skip_verify {
            tracing::warn!("Upstream TLS certificate verification is disabled");
        }

        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .danger_accept_invalid_certs(config.tls_insecure_skip_verify)
            .build()
            .map_err(TowerError::Http)?;

        Ok(Self { inner })
    }

    /// Build a request for `method` and `url` carrying `body`
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the body cannot be encoded
    pub fn build(&self, method: Method, url: Url, body: RequestBody) -> AuthResult<Request> {
        let builder = self.inner.request(method, url);
        let builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Form(pairs) => builder.form(&pairs),
            RequestBody::Json(value) => builder.json(&value),
        };
        Ok(builder.build()?)
    }

    /// Send `request` and return the upstream status
    ///
    /// # Errors
    ///
    /// Returns `Internal` on transport failure
    pub async fn send(&self, request: Request) -> AuthResult<StatusCode> {
        let (status, _) = self.exchange(request).await?;
        Ok(status)
    }

    /// Send `request` and decode the body as `T`
    ///
    /// The body is decoded whatever the status; the caller decides what a
    /// non-2xx answer means.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on transport failure or if the body does not
    /// decode as `T`
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: Request,
    ) -> AuthResult<(StatusCode, T)> {
        let (status, body) = self.exchange(request).await?;
        let decoded = serde_json::from_slice(&body)?;
        Ok((status, decoded))
    }

    async fn exchange(&self, request: Request) -> AuthResult<(StatusCode, Vec<u8>)> {
        let request_dump = dump_request(&request);
        tracing::debug!("{}", request_dump);

        let response = match self.inner.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "{}", dump_failure(&request_dump));
                return Err(e.into());
            }
        };

        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let body = match response.bytes().await {
            Ok(body) => body.to_vec(),
            Err(e) => {
                tracing::debug!(error = %e, status = %status, "{}", dump_failure(&request_dump));
                return Err(e.into());
            }
        };

        tracing::debug!("{}", dump_response(version, status, &headers, &body));
        Ok((status, body))
    }
}

fn dump_request(request: &Request) -> String {
    let data = request
        .body()
        .and_then(|body| body.as_bytes())
        .map(String::from_utf8_lossy)
        .unwrap_or_default();
    format!("{} {}. Data: {}", request.method(), request.url(), data)
}

fn dump_failure(request_dump: &str) -> String {
    format!("{} -> no response", request_dump)
}

fn dump_response(
    version: reqwest::Version,
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
) -> String {
    let mut dump = format!("{:?} {}\r\n", version, status);
    for (name, value) in headers {
        dump.push_str(&format!(
            "{}: {}\r\n",
            name,
            String::from_utf8_lossy(value.as_bytes())
        ));
    }
    dump.push_str("\r\n");
    dump.push_str(&String::from_utf8_lossy(body));
    dump
}

/// Append path segments to `base`, percent-encoding each one
///
/// A trailing empty segment on the base (`http://host/`) is dropped first,
/// so `endpoint("http://host/", ["clients", "a b"])` is
/// `http://host/clients/a%20b`.
///
/// # Errors
///
/// Returns `Internal` if `base` cannot carry a path
pub fn endpoint<S: AsRef<str>>(base: &Url, segments: &[S]) -> AuthResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| AuthError::internal(format!("{} cannot be a base URL", base)))?
        .pop_if_empty()
        .extend(segments.iter().map(AsRef::as_ref));
    Ok(url)
}
