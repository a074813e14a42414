//! Verification strategies and the engine that runs them
//!
//! Every strategy implements [`Verifier`]: given the inbound request and the
//! request's [`TraceContext`], produce a [`ConsumerId`] or an
//! [`AuthError`]. The strategy is chosen once at startup by
//! [`AuthService::from_config`] and never changes for the process lifetime.
//!
//! All outbound HTTP calls go through [`exchange_json`], which brackets the
//! call with a child span, injects the trace headers and records the
//! upstream status.

pub mod credential;
pub mod identity_provider;
pub mod introspection;
pub mod policy;
pub mod types;
pub mod userinfo;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use reqwest::Request;
use serde::de::DeserializeOwned;
use url::Url;

pub use credential::extract_bearer;
pub use identity_provider::{
    CognitoIdentityProvider, IdentityProvider, IdentityProviderVerifier, ProviderError,
    ProviderUser,
};
pub use introspection::IntrospectionVerifier;
pub use policy::{normalize_resource, PolicyVerifier};
pub use userinfo::UserInfoVerifier;

use crate::client::{HttpClient, RequestBody};
use crate::config::{AuthMode, Config};
use crate::error::{AuthError, AuthResult, Result, TowerError};
use crate::metrics::{record_upstream, VerifyMetrics};
use crate::tracer::{SpanRole, TraceContext, TracerHandle};

/// Identity handed back to the proxy in `X-Consumer-Id`
///
/// Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerId(String);

impl ConsumerId {
    /// Wrap the identity taken from `field` of a remote response
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` if `value` is empty
    pub fn from_field(value: String, field: &str) -> AuthResult<Self> {
        if value.is_empty() {
            return Err(AuthError::unauthorized(format!("empty {} in response", field)));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The parts of an inbound request the strategies look at
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
}

impl InboundRequest {
    pub fn new(method: Method, path: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method,
            path: path.into(),
            headers,
        }
    }
}

/// A verification strategy
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Verify the caller of `request`
    ///
    /// # Errors
    ///
    /// `Unauthorized` when the caller is to blame, `Internal` otherwise
    async fn verify(
        &self,
        request: &InboundRequest,
        trace: &mut TraceContext,
    ) -> AuthResult<ConsumerId>;
}

/// The strategy selected at startup
#[derive(Debug)]
pub enum AuthStrategy {
    Introspection(IntrospectionVerifier),
    IntrospectionPolicy(PolicyVerifier),
    UserInfo(UserInfoVerifier),
    IdentityProvider(IdentityProviderVerifier),
}

impl AuthStrategy {
    /// Label used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Self::Introspection(_) => AuthMode::Introspection.as_str(),
            Self::IntrospectionPolicy(_) => AuthMode::IntrospectionPolicy.as_str(),
            Self::UserInfo(_) => AuthMode::Userinfo.as_str(),
            Self::IdentityProvider(_) => AuthMode::IdentityProvider.as_str(),
        }
    }
}

#[async_trait]
impl Verifier for AuthStrategy {
    async fn verify(
        &self,
        request: &InboundRequest,
        trace: &mut TraceContext,
    ) -> AuthResult<ConsumerId> {
        match self {
            Self::Introspection(v) => v.verify(request, trace).await,
            Self::IntrospectionPolicy(v) => v.verify(request, trace).await,
            Self::UserInfo(v) => v.verify(request, trace).await,
            Self::IdentityProvider(v) => v.verify(request, trace).await,
        }
    }
}

/// Result of one traced verification
#[derive(Debug)]
pub struct Verification {
    pub outcome: AuthResult<ConsumerId>,
    /// Trace id of the parent span, for log correlation
    pub trace_id: Option<String>,
}

/// The verification engine
///
/// Cheap to clone; shared by every request handler.
#[derive(Debug, Clone)]
pub struct AuthService {
    strategy: Arc<AuthStrategy>,
    tracer: TracerHandle,
}

impl AuthService {
    pub fn new(strategy: AuthStrategy, tracer: TracerHandle) -> Self {
        Self {
            strategy: Arc::new(strategy),
            tracer,
        }
    }

    /// Build the engine for the configured mode
    ///
    /// # Errors
    ///
    /// Returns error if a required upstream URL is missing or invalid, or
    /// if the HTTP client cannot be built
    pub async fn from_config(config: &Config, tracer: TracerHandle) -> Result<Self> {
        let client = HttpClient::new(&config.auth)?;
        let mode = config.effective_mode();

        let strategy = match mode {
            AuthMode::Introspection => AuthStrategy::Introspection(IntrospectionVerifier::new(
                client,
                &config.auth_server_url()?,
            )?),
            AuthMode::IntrospectionPolicy => AuthStrategy::IntrospectionPolicy(
                PolicyVerifier::new(client, &config.auth_server_url()?, config.policy_url()?)?,
            ),
            AuthMode::Userinfo => {
                AuthStrategy::UserInfo(UserInfoVerifier::new(client, &config.auth_server_url()?)?)
            }
            AuthMode::IdentityProvider if config.aws.uses_auth_service_url() => {
                tracing::warn!(
                    "Neither COGNITO_APP_CLIENT_ID nor COGNITO_USER_POOL_ID is set, \
                     identity provider verifications will fail"
                );
                AuthStrategy::IdentityProvider(IdentityProviderVerifier::unconfigured())
            }
            AuthMode::IdentityProvider => {
                let timeout = Duration::from_secs(config.auth.request_timeout_secs);
                let provider = CognitoIdentityProvider::from_config(&config.aws, timeout).await;
                let endpoint = provider.endpoint().to_string();
                AuthStrategy::IdentityProvider(IdentityProviderVerifier::new(
                    Arc::new(provider),
                    endpoint,
                ))
            }
            AuthMode::Cognito => {
                return Err(TowerError::Config("cognito mode was not resolved".to_string()).into())
            }
        };

        tracing::info!(strategy = strategy.name(), "Verification strategy selected");
        Ok(Self::new(strategy, tracer))
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Verify `request`, discarding the trace id
    pub async fn verify(&self, request: &InboundRequest) -> AuthResult<ConsumerId> {
        self.verify_traced(request).await.outcome
    }

    /// Verify `request` inside a fresh trace context
    ///
    /// The parent span carries the final status (200, 401 or 500). Both
    /// spans are ended before this returns, whatever the outcome.
    pub async fn verify_traced(&self, request: &InboundRequest) -> Verification {
        let metrics = VerifyMetrics::new(self.strategy.name());
        let mut trace = self.tracer.context();
        let method = request.method.as_str();

        if let Err(e) = trace.parent(method, &request.path, &request.headers) {
            tracing::warn!(error = %e, "Could not open request span");
        }
        trace.ext_url(SpanRole::Parent, method, "/");

        let outcome = self.strategy.verify(request, &mut trace).await;

        let status = match &outcome {
            Ok(_) => StatusCode::OK,
            Err(e) => e.status_code(),
        };
        trace.ext_status(SpanRole::Parent, status.as_u16());
        if let Err(e @ AuthError::Internal(_)) = &outcome {
            trace.record_error(SpanRole::Parent, &e.to_string());
        }

        let trace_id = trace.trace_id();
        trace.finish();
        metrics.record(&outcome);

        Verification { outcome, trace_id }
    }
}

/// Build an upstream request carrying `X-Forwarded-Proto: https` and, when
/// `bearer` is given, `Authorization: Bearer <token>`
pub(crate) fn upstream_request(
    client: &HttpClient,
    method: Method,
    url: Url,
    body: RequestBody,
    bearer: Option<&str>,
) -> AuthResult<Request> {
    let mut request = client.build(method, url, body)?;
    let headers = request.headers_mut();
    headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
    if let Some(token) = bearer {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| AuthError::unauthorized(format!("unusable bearer token: {}", e)))?;
        headers.insert(http::header::AUTHORIZATION, value);
    }
    Ok(request)
}

/// Send `request` inside a child span and decode the answer as `T`
///
/// The child span is named by the request path; `label` is the metrics
/// endpoint label.
pub(crate) async fn exchange_json<T: DeserializeOwned>(
    client: &HttpClient,
    trace: &mut TraceContext,
    mut request: Request,
    label: &'static str,
) -> AuthResult<(StatusCode, T)> {
    let path = request.url().path().to_string();
    if let Err(e) = trace.child(&path) {
        tracing::warn!(error = %e, "Could not open span for {}", path);
    }
    trace.ext_url(
        SpanRole::Child,
        request.method().as_str(),
        request.url().as_str(),
    );
    trace.inject(request.headers_mut());

    let result = client.send_json::<T>(request).await;
    match &result {
        Ok((status, _)) => {
            trace.ext_status(SpanRole::Child, status.as_u16());
            record_upstream(label, status.as_str());
        }
        Err(e) => {
            trace.record_error(SpanRole::Child, &e.to_string());
            record_upstream(label, "error");
        }
    }
    result
}
