//! Managed identity provider lookup (AWS Cognito `GetUser`)
//!
//! The provider is reached through its SDK rather than the shared HTTP
//! client. [`IdentityProvider`] is the seam: [`CognitoIdentityProvider`] in
//! production, a mock in tests. The child span is opened before the call
//! and closed after it, so it covers the provider latency.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_cognitoidentityprovider::error::DisplayErrorContext;
use aws_sdk_cognitoidentityprovider::operation::get_user::GetUserError;
use thiserror::Error;

use super::{extract_bearer, ConsumerId, InboundRequest, Verifier};
use crate::config::AwsConfig;
use crate::error::{AuthError, AuthResult};
use crate::metrics::record_upstream;
use crate::tracer::{SpanRole, TraceContext};

/// Span name of the provider call
pub const GET_USER_OPERATION: &str = "GetUser";

/// User returned by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderUser {
    pub username: String,
}

/// Provider call failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider refused the access token
    #[error("access token rejected: {0}")]
    Rejected(String),

    /// The provider could not be reached or failed
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Rejected(_) => AuthError::unauthorized(err.to_string()),
            ProviderError::Unavailable(_) => AuthError::internal(err.to_string()),
        }
    }
}

/// "Get user by access token"
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn get_user(&self, access_token: &str) -> Result<ProviderUser, ProviderError>;
}

/// Cognito user pool client
#[derive(Debug, Clone)]
pub struct CognitoIdentityProvider {
    client: aws_sdk_cognitoidentityprovider::Client,
    endpoint: String,
    timeout: Option<Duration>,
}

impl CognitoIdentityProvider {
    /// Build a client for the configured region and profile
    ///
    /// When `use_context` is on every call is bounded by `request_timeout`.
    pub async fn from_config(aws: &AwsConfig, request_timeout: Duration) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(aws.region.clone()));
        if let Some(profile) = &aws.profile {
            loader = loader.profile_name(profile);
        }
        let sdk_config = loader.load().await;

        Self {
            client: aws_sdk_cognitoidentityprovider::Client::new(&sdk_config),
            endpoint: format!("https://cognito-idp.{}.amazonaws.com/", aws.region),
            timeout: aws.use_context.then_some(request_timeout),
        }
    }

    /// Regional endpoint, recorded on the span
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl IdentityProvider for CognitoIdentityProvider {
    async fn get_user(&self, access_token: &str) -> Result<ProviderUser, ProviderError> {
        let call = self.client.get_user().access_token(access_token).send();
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                ProviderError::Unavailable(format!("no answer within {:?}", limit))
            })?,
            None => call.await,
        };

        match result {
            Ok(output) => Ok(ProviderUser {
                username: output.username().to_string(),
            }),
            Err(err) => match err.as_service_error() {
                Some(service) if is_rejection(service) => {
                    Err(ProviderError::Rejected(service.to_string()))
                }
                _ => Err(ProviderError::Unavailable(
                    DisplayErrorContext(&err).to_string(),
                )),
            },
        }
    }
}

fn is_rejection(err: &GetUserError) -> bool {
    err.is_not_authorized_exception()
        || err.is_user_not_found_exception()
        || err.is_user_not_confirmed_exception()
        || err.is_password_reset_required_exception()
}

/// Strategy backed by an [`IdentityProvider`]
#[derive(Clone)]
pub struct IdentityProviderVerifier {
    provider: Option<Arc<dyn IdentityProvider>>,
    endpoint: String,
}

impl IdentityProviderVerifier {
    pub fn new(provider: Arc<dyn IdentityProvider>, endpoint: impl Into<String>) -> Self {
        Self {
            provider: Some(provider),
            endpoint: endpoint.into(),
        }
    }

    /// Verifier with no provider client; every verification is `Internal`
    pub fn unconfigured() -> Self {
        Self {
            provider: None,
            endpoint: String::new(),
        }
    }
}

impl std::fmt::Debug for IdentityProviderVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProviderVerifier")
            .field("configured", &self.provider.is_some())
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl Verifier for IdentityProviderVerifier {
    async fn verify(
        &self,
        request: &InboundRequest,
        trace: &mut TraceContext,
    ) -> AuthResult<ConsumerId> {
        let token = extract_bearer(&request.headers)?;
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| AuthError::internal("identity provider client is not configured"))?;

        if let Err(e) = trace.child(GET_USER_OPERATION) {
            tracing::warn!(error = %e, "Could not open span for {}", GET_USER_OPERATION);
        }
        trace.ext_url(SpanRole::Child, "POST", &self.endpoint);

        let result = provider.get_user(token).await;

        match &result {
            Ok(_) => {
                trace.ext_status(SpanRole::Child, 200);
                record_upstream("get_user", "200");
            }
            Err(e @ ProviderError::Rejected(_)) => {
                trace.ext_status(SpanRole::Child, 401);
                trace.record_error(SpanRole::Child, &e.to_string());
                record_upstream("get_user", "401");
            }
            Err(e @ ProviderError::Unavailable(_)) => {
                trace.record_error(SpanRole::Child, &e.to_string());
                record_upstream("get_user", "error");
            }
        }

        let user = result?;
        ConsumerId::from_field(user.username, "username")
    }
}
