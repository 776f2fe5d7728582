use core::fmt;

use serde::Deserialize;

/// Username and secret presented during AUTH.
///
/// The secret never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// `None` when `username` is empty, meaning "do not authenticate".
    #[must_use]
    pub fn optional(username: impl Into<String>, password: impl Into<String>) -> Option<Self> {
        let credentials = Self::new(username, password);
        (!credentials.username.is_empty()).then_some(credentials)
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_is_redacted() {
        let debug = format!("{:?}", Credentials::new("alice", "hunter2"));
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_empty_username_means_no_credentials() {
        assert!(Credentials::optional("", "x").is_none());
        assert_eq!(
            Credentials::optional("a", "b"),
            Some(Credentials::new("a", "b"))
        );
    }
}
