//! Caller identity passed explicitly to the transport.

use parking_lot::RwLock;

/// Role sent when the session has none selected.
pub const DEFAULT_ROLE: &str = "STUDENT";

/// Access token and active role for one signed-in user.
#[derive(Debug, Default)]
pub struct Session {
    access_token: RwLock<Option<String>>,
    active_role: RwLock<Option<String>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let session = Self::new();
        session.set_access_token(Some(token.into()));
        session
    }

    pub fn access_token(&self) -> Option<String> {
        self.access_token.read().clone()
    }

    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }

    /// The active role, or [`DEFAULT_ROLE`].
    pub fn role(&self) -> String {
        self.active_role
            .read()
            .clone()
            .unwrap_or_else(|| DEFAULT_ROLE.to_string())
    }

    pub fn set_role(&self, role: Option<String>) {
        *self.active_role.write() = role;
    }

    /// Forget the token, as after a failed refresh.
    pub fn clear(&self) {
        self.set_access_token(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_defaults_to_student() {
        let session = Session::new();
        assert_eq!(session.role(), "STUDENT");

        session.set_role(Some("TUTOR".to_string()));
        assert_eq!(session.role(), "TUTOR");
    }

    #[test]
    fn test_clear_drops_token() {
        let session = Session::with_token("abc");
        assert_eq!(session.access_token().as_deref(), Some("abc"));
        session.clear();
        assert!(session.access_token().is_none());
    }
}
