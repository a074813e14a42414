//! Payloads exchanged with the upstream servers
//!
//! Every field decodes with a default, so an upstream error body such as
//! `{"error":"invalid_request"}` still decodes and the strategy rejects it
//! on content instead of failing on shape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Metadata key holding the role passed to the policy engine
pub const ROLE_METADATA_KEY: &str = "role";

/// Token introspection answer (RFC 7662)
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct IntrospectionResponse {
    pub active: bool,
    pub client_id: String,
    pub sub: String,
    pub scope: String,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    pub token_type: String,
}

/// OAuth2 client record
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClientInfoResponse {
    pub client_id: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ClientInfoResponse {
    /// Role from the client metadata, empty unless it is a JSON string
    pub fn role(&self) -> &str {
        self.metadata
            .get(ROLE_METADATA_KEY)
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
    }
}

/// Policy engine question
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PolicyRequest {
    pub action: String,
    pub resource: String,
    pub subject: String,
}

/// Policy engine answer
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyResponse {
    pub allowed: bool,
}

/// OpenID Connect user-info answer
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct UserInfoResponse {
    pub sub: String,
    pub name: String,
    pub given_name: String,
    pub family_name: String,
    pub preferred_username: String,
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_introspection_decodes_partial_body() {
        let resp: IntrospectionResponse =
            serde_json::from_str(r#"{"active":true,"client_id":"svc"}"#).unwrap();
        assert!(resp.active);
        assert_eq!(resp.client_id, "svc");
        assert_eq!(resp.exp, 0);
    }

    #[test]
    fn test_introspection_decodes_error_body() {
        let resp: IntrospectionResponse =
            serde_json::from_str(r#"{"error":"invalid_request"}"#).unwrap();
        assert!(!resp.active);
        assert!(resp.client_id.is_empty());
    }

    #[test]
    fn test_client_role_string() {
        let info: ClientInfoResponse =
            serde_json::from_str(r#"{"client_id":"svc","metadata":{"role":"admin"}}"#).unwrap();
        assert_eq!(info.role(), "admin");
    }

    #[test]
    fn test_client_role_non_string_or_missing() {
        let info: ClientInfoResponse =
            serde_json::from_str(r#"{"client_id":"svc","metadata":{"role":7}}"#).unwrap();
        assert_eq!(info.role(), "");

        let info: ClientInfoResponse = serde_json::from_str(r#"{"client_id":"svc"}"#).unwrap();
        assert_eq!(info.role(), "");
    }

    #[test]
    fn test_policy_request_shape() {
        let request = PolicyRequest {
            action: "GET".to_string(),
            resource: "orders:42".to_string(),
            subject: "admin".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"action": "GET", "resource": "orders:42", "subject": "admin"})
        );
    }

    #[test]
    fn test_userinfo_defaults() {
        let info: UserInfoResponse = serde_json::from_str(r#"{"email":"a@b.c"}"#).unwrap();
        assert!(info.sub.is_empty());
        assert_eq!(info.email, "a@b.c");
    }
}
