//! Managed user-info lookup
//!
//! `GET {auth}/oauth2/userInfo` forwarding the caller's bearer token. Used
//! for Cognito pools fronted by their hosted OAuth2 domain.

use async_trait::async_trait;
use http::Method;
use url::Url;

use super::types::UserInfoResponse;
use super::{exchange_json, extract_bearer, upstream_request, ConsumerId, InboundRequest, Verifier};
use crate::client::{endpoint, HttpClient, RequestBody};
use crate::error::AuthResult;
use crate::tracer::TraceContext;

/// Path segments of the user-info endpoint
pub const USERINFO_PATH: [&str; 2] = ["oauth2", "userInfo"];

#[derive(Debug, Clone)]
pub struct UserInfoVerifier {
    client: HttpClient,
    userinfo_url: Url,
}

impl UserInfoVerifier {
    /// # Errors
    ///
    /// Returns `Internal` if `auth_server` cannot carry a path
    pub fn new(client: HttpClient, auth_server: &Url) -> AuthResult<Self> {
        Ok(Self {
            userinfo_url: endpoint(auth_server, &USERINFO_PATH)?,
            client,
        })
    }

    pub fn userinfo_url(&self) -> &Url {
        &self.userinfo_url
    }
}

#[async_trait]
impl Verifier for UserInfoVerifier {
    async fn verify(
        &self,
        request: &InboundRequest,
        trace: &mut TraceContext,
    ) -> AuthResult<ConsumerId> {
        let token = extract_bearer(&request.headers)?;
        let outbound = upstream_request(
            &self.client,
            Method::GET,
            self.userinfo_url.clone(),
            RequestBody::Empty,
            Some(token),
        )?;
        let (_, info): (_, UserInfoResponse) =
            exchange_json(&self.client, trace, outbound, "userinfo").await?;
        ConsumerId::from_field(info.sub, "sub")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;

    #[test]
    fn test_userinfo_url() {
        let client = HttpClient::new(&AuthConfig::default()).unwrap();
        let verifier = UserInfoVerifier::new(
            client,
            &Url::parse("https://pool.auth.eu-west-1.amazoncognito.com").unwrap(),
        )
        .unwrap();
        assert_eq!(
            verifier.userinfo_url().as_str(),
            "https://pool.auth.eu-west-1.amazoncognito.com/oauth2/userInfo"
        );
    }
}
