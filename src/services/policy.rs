//! Token introspection followed by a policy-engine decision
//!
//! Three ordered calls:
//!
//! 1. introspection, which yields the client id (the consumer identity)
//! 2. `GET {auth}/clients/{client_id}`, which yields the client's role
//! 3. `POST {policy}/engines/acp/ory/glob/allowed` with
//!    `{action, resource, subject}` built from the inbound method, the
//!    normalized `X-Forwarded-Uri` and the role
//!
//! Without a policy URL every request is denied before any call is made.

use async_trait::async_trait;
use http::{HeaderMap, Method};
use url::Url;

use super::introspection::IntrospectionVerifier;
use super::types::{ClientInfoResponse, PolicyRequest, PolicyResponse};
use super::{exchange_json, extract_bearer, upstream_request, ConsumerId, InboundRequest, Verifier};
use crate::client::{endpoint, HttpClient, RequestBody};
use crate::error::{AuthError, AuthResult};
use crate::tracer::TraceContext;

/// Header Traefik uses to pass the original request URI
pub const FORWARDED_URI_HEADER: &str = "x-forwarded-uri";

/// Path segments of the glob policy decision endpoint
pub const POLICY_ALLOWED_PATH: [&str; 5] = ["engines", "acp", "ory", "glob", "allowed"];

/// Resource used when the forwarded URI is empty or `/`
pub const ROOT_RESOURCE: &str = "home";

#[derive(Debug, Clone)]
pub struct PolicyVerifier {
    introspection: IntrospectionVerifier,
    client: HttpClient,
    auth_server: Url,
    allowed_url: Option<Url>,
}

impl PolicyVerifier {
    /// # Errors
    ///
    /// Returns `Internal` if either base URL cannot carry a path
    pub fn new(client: HttpClient, auth_server: &Url, policy: Option<Url>) -> AuthResult<Self> {
        let allowed_url = policy
            .map(|base| endpoint(&base, &POLICY_ALLOWED_PATH))
            .transpose()?;

        Ok(Self {
            introspection: IntrospectionVerifier::new(client.clone(), auth_server)?,
            client,
            auth_server: auth_server.clone(),
            allowed_url,
        })
    }

    pub fn allowed_url(&self) -> Option<&Url> {
        self.allowed_url.as_ref()
    }

    async fn client_info(
        &self,
        client_id: &ConsumerId,
        token: &str,
        trace: &mut TraceContext,
    ) -> AuthResult<ClientInfoResponse> {
        let url = endpoint(&self.auth_server, &["clients", client_id.as_str()])?;
        let request = upstream_request(&self.client, Method::GET, url, RequestBody::Empty, Some(token))?;
        let (_, info) = exchange_json(&self.client, trace, request, "clients").await?;
        Ok(info)
    }

    async fn allowed(
        &self,
        allowed_url: &Url,
        question: &PolicyRequest,
        trace: &mut TraceContext,
    ) -> AuthResult<bool> {
        let request = upstream_request(
            &self.client,
            Method::POST,
            allowed_url.clone(),
            RequestBody::Json(serde_json::to_value(question)?),
            None,
        )?;
        let (_, answer): (_, PolicyResponse) =
            exchange_json(&self.client, trace, request, "policy").await?;
        Ok(answer.allowed)
    }
}

#[async_trait]
impl Verifier for PolicyVerifier {
    async fn verify(
        &self,
        request: &InboundRequest,
        trace: &mut TraceContext,
    ) -> AuthResult<ConsumerId> {
        let token = extract_bearer(&request.headers)?;
        let allowed_url = self
            .allowed_url
            .as_ref()
            .ok_or_else(|| AuthError::unauthorized("policy engine URL is not configured"))?;

        let consumer = self.introspection.active_client(token, trace).await?;

        let info = self.client_info(&consumer, token, trace).await?;
        if info.client_id.is_empty() {
            return Err(AuthError::unauthorized(format!(
                "client {} not found",
                consumer
            )));
        }

        let question = PolicyRequest {
            action: request.method.as_str().to_string(),
            resource: normalize_resource(&forwarded_uri(&request.headers)),
            subject: info.role().to_string(),
        };
        tracing::debug!(
            action = %question.action,
            resource = %question.resource,
            subject = %question.subject,
            "Asking policy engine"
        );

        if !self.allowed(allowed_url, &question, trace).await? {
            return Err(AuthError::unauthorized(format!(
                "{} {} denied for role {:?}",
                question.action, question.resource, question.subject
            )));
        }

        Ok(consumer)
    }
}

/// Every `X-Forwarded-Uri` value joined with `,`
pub fn forwarded_uri(headers: &HeaderMap) -> String {
    headers
        .get_all(FORWARDED_URI_HEADER)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join(",")
}

/// Turn a URI path into a policy resource name
///
/// Leading and trailing `/` are dropped and inner `/` become `:`, so
/// `/orders/42` is `orders:42`. An empty path is `home`.
pub fn normalize_resource(uri: &str) -> String {
    let trimmed = uri.trim_matches('/');
    if trimmed.is_empty() {
        ROOT_RESOURCE.to_string()
    } else {
        trimmed.replace('/', ":")
    }
}
