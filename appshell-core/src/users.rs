//! User controllers
//!
//! A user controller turns credentials into an [`Identity`] and looks
//! identities up again for session validation. Two controllers exist:
//! [`StubUserController`], which always yields `admin`, and
//! [`crate::radius::RadiusUserController`]. Management operations a
//! backend cannot perform return [`UserError::Unsupported`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("{controller} does not support {operation}")]
    Unsupported {
        controller: String,
        operation: &'static str,
    },
}

/// An authenticated (or looked-up) user. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    id: String,
    username: String,
    authenticated: bool,
    active: bool,
}

impl Identity {
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        authenticated: bool,
        active: bool,
    ) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            authenticated,
            active,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// False when the account is suspended or rejected for reasons
    /// other than authentication
    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.username, self.id)
    }
}

/// User management backend
#[async_trait]
pub trait UserController: Send + Sync {
    /// Info string used in log lines
    fn describe(&self) -> String;

    /// Check credentials; `None` on any failure
    async fn authenticate(&self, username: &str, password: &str) -> Option<Identity>;

    /// Look an identity up by id
    async fn get_user(&self, user_id: &str) -> Option<Identity>;

    /// Decide whether `username` may act given request attributes
    async fn authorize(&self, _username: &str, _attributes: &Map<String, Value>) -> Result<bool, UserError> {
        Err(self.unsupported("authorize"))
    }

    async fn enable_user(&self, _user_id: &str) -> Result<(), UserError> {
        Err(self.unsupported("enable_user"))
    }

    async fn disable_user(&self, _user_id: &str) -> Result<(), UserError> {
        Err(self.unsupported("disable_user"))
    }

    async fn add_user(&self, _username: &str, _password: Option<&str>, _enabled: bool) -> Result<Identity, UserError> {
        Err(self.unsupported("add_user"))
    }

    async fn update_user(
        &self,
        _user_id: &str,
        _username: Option<&str>,
        _password: Option<&str>,
        _enabled: Option<bool>,
    ) -> Result<(), UserError> {
        Err(self.unsupported("update_user"))
    }

    async fn delete_user(&self, _user_id: &str) -> Result<(), UserError> {
        Err(self.unsupported("delete_user"))
    }

    fn unsupported(&self, operation: &'static str) -> UserError {
        UserError::Unsupported {
            controller: self.describe(),
            operation,
        }
    }
}

/// Controller used when no real backend is configured: every login
/// succeeds as `admin`.
#[derive(Debug, Default)]
pub struct StubUserController;

const STUB_USER: &str = "admin";

impl StubUserController {
    fn admin() -> Identity {
        Identity::new(STUB_USER, STUB_USER, true, true)
    }
}

#[async_trait]
impl UserController for StubUserController {
    fn describe(&self) -> String {
        "StubUserController()".to_string()
    }

    async fn authenticate(&self, _username: &str, _password: &str) -> Option<Identity> {
        Some(Self::admin())
    }

    async fn get_user(&self, _user_id: &str) -> Option<Identity> {
        Some(Self::admin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_always_admin() {
        let controller = StubUserController;
        for (user, pass) in [("admin", "admin"), ("eve", ""), ("", "whatever")] {
            let identity = controller.authenticate(user, pass).await.unwrap();
            assert_eq!(identity.username(), "admin");
            assert!(identity.is_authenticated());
            assert!(identity.is_active());
        }
        assert_eq!(controller.get_user("anyone").await.unwrap().id(), "admin");
    }

    #[tokio::test]
    async fn test_stub_management_is_unsupported() {
        let controller = StubUserController;
        let err = controller.disable_user("admin").await.unwrap_err();
        assert_eq!(err.to_string(), "StubUserController() does not support disable_user");
        assert!(controller.add_user("bob", None, true).await.is_err());
        assert!(controller.authorize("admin", &Map::new()).await.is_err());
    }

    #[test]
    fn test_identity_display() {
        let identity = Identity::new("42", "alice", true, true);
        assert_eq!(identity.to_string(), "alice(42)");
    }
}
