//! Identity provider boundary
//!
//! The sign-in screen and its credential storage belong to the identity
//! provider. The session only needs the signed-in user and the ID token sent
//! along with the authentication call.

use crate::error::IdentityError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// The user the scanning device is signed in as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedInUser {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Bearer token presented to the remote function
    pub id_token: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<SignedInUser>;

    /// Run the provider's sign-in flow
    async fn sign_in(&self) -> Result<SignedInUser, IdentityError>;

    fn sign_out(&self);
}

/// Provider with one fixed account, for headless clients
#[derive(Debug)]
pub struct StaticIdentity {
    account: SignedInUser,
    current: RwLock<Option<SignedInUser>>,
}

impl StaticIdentity {
    pub fn new(account: SignedInUser) -> Self {
        Self {
            account,
            current: RwLock::new(None),
        }
    }

    /// Builder pattern: start out signed in
    pub fn signed_in(self) -> Self {
        self.set(Some(self.account.clone()));
        self
    }

    fn set(&self, user: Option<SignedInUser>) {
        match self.current.write() {
            Ok(mut current) => *current = user,
            Err(poisoned) => *poisoned.into_inner() = user,
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<SignedInUser> {
        match self.current.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn sign_in(&self) -> Result<SignedInUser, IdentityError> {
        self.set(Some(self.account.clone()));
        Ok(self.account.clone())
    }

    fn sign_out(&self) {
        self.set(None);
    }
}
