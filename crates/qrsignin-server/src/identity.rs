//! Caller identification for the authentication endpoint

use async_trait::async_trait;
use std::collections::HashMap;

/// User id every call is attributed to in development mode
pub const DEV_UID: &str = "123456780";

/// Resolves the bearer token of a call to the caller's user id
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// `None` when the caller is not signed in
    async fn verify(&self, id_token: Option<&str>) -> Option<String>;
}

/// Development mode: every caller is [`DEV_UID`]
#[derive(Debug, Default, Clone, Copy)]
pub struct DevIdentity;

#[async_trait]
impl IdentityVerifier for DevIdentity {
    async fn verify(&self, _id_token: Option<&str>) -> Option<String> {
        Some(DEV_UID.to_string())
    }
}

/// Fixed table of ID tokens and the users they belong to
#[derive(Debug, Default, Clone)]
pub struct StaticTokens {
    users: HashMap<String, String>,
}

impl StaticTokens {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    /// Builder pattern: add one token
    pub fn with_user(mut self, id_token: impl Into<String>, uid: impl Into<String>) -> Self {
        self.users.insert(id_token.into(), uid.into());
        self
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokens {
    async fn verify(&self, id_token: Option<&str>) -> Option<String> {
        self.users.get(id_token?).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_tokens() {
        let verifier = StaticTokens::default().with_user("id-token", "uid-1");
        assert_eq!(verifier.verify(Some("id-token")).await.as_deref(), Some("uid-1"));
        assert!(verifier.verify(Some("other")).await.is_none());
        assert!(verifier.verify(None).await.is_none());
    }

    #[tokio::test]
    async fn test_dev_identity() {
        assert_eq!(DevIdentity.verify(None).await.as_deref(), Some(DEV_UID));
    }
}
