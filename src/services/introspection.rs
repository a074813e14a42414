//! Remote token introspection
//!
//! `POST {auth}/oauth2/introspect` with the form body `token=<value>`. The
//! token is accepted when the server reports it active and names the client
//! it was issued to; that client id is the consumer identity.

use async_trait::async_trait;
use http::Method;
use url::Url;

use super::types::IntrospectionResponse;
use super::{exchange_json, extract_bearer, upstream_request, ConsumerId, InboundRequest, Verifier};
use crate::client::{endpoint, HttpClient, RequestBody};
use crate::error::{AuthError, AuthResult};
use crate::tracer::TraceContext;

/// Path segments of the introspection endpoint
pub const INTROSPECT_PATH: [&str; 2] = ["oauth2", "introspect"];

#[derive(Debug, Clone)]
pub struct IntrospectionVerifier {
    client: HttpClient,
    introspect_url: Url,
}

impl IntrospectionVerifier {
    /// # Errors
    ///
    /// Returns `Internal` if `auth_server` cannot carry a path
    pub fn new(client: HttpClient, auth_server: &Url) -> AuthResult<Self> {
        Ok(Self {
            introspect_url: endpoint(auth_server, &INTROSPECT_PATH)?,
            client,
        })
    }

    pub fn introspect_url(&self) -> &Url {
        &self.introspect_url
    }

    /// Raw introspection answer for `token`
    pub async fn introspect(
        &self,
        token: &str,
        trace: &mut TraceContext,
    ) -> AuthResult<IntrospectionResponse> {
        let request = upstream_request(
            &self.client,
            Method::POST,
            self.introspect_url.clone(),
            RequestBody::form([("token", token)]),
            None,
        )?;
        let (_, body) = exchange_json(&self.client, trace, request, "introspect").await?;
        Ok(body)
    }

    /// Client id of an active `token`
    ///
    /// # Errors
    ///
    /// `Unauthorized` when the token is inactive or has no client id
    pub async fn active_client(
        &self,
        token: &str,
        trace: &mut TraceContext,
    ) -> AuthResult<ConsumerId> {
        let response = self.introspect(token, trace).await?;
        if !response.active {
            return Err(AuthError::unauthorized("token is not active"));
        }
        ConsumerId::from_field(response.client_id, "client_id")
    }
}

#[async_trait]
impl Verifier for IntrospectionVerifier {
    async fn verify(
        &self,
        request: &InboundRequest,
        trace: &mut TraceContext,
    ) -> AuthResult<ConsumerId> {
        let token = extract_bearer(&request.headers)?;
        self.active_client(token, trace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;

    #[test]
    fn test_introspect_url() {
        let client = HttpClient::new(&AuthConfig::default()).unwrap();
        let verifier =
            IntrospectionVerifier::new(client, &Url::parse("http://hydra:4445/").unwrap()).unwrap();
        assert_eq!(
            verifier.introspect_url().as_str(),
            "http://hydra:4445/oauth2/introspect"
        );
    }
}
