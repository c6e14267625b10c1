//! Handshake header set.

/// Library identifier announced to the server.
pub const LIBRARY_VERSION: &str = concat!("rust ", env!("CARGO_PKG_VERSION"));

/// Headers sent with the connection upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeHeaders {
    library_version: String,
    disable_auth_ui: bool,
    cookie: Option<String>,
    key: Option<String>,
    advisory_name: Option<String>,
}

impl HandshakeHeaders {
    /// Headers with only the library version set and the auth UI disabled.
    pub fn new(library_version: impl Into<String>) -> Self {
        Self {
            library_version: library_version.into(),
            disable_auth_ui: true,
            cookie: None,
            key: None,
            advisory_name: None,
        }
    }

    /// Set the authentication cookie.
    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// Set the session key that accompanies a freshly negotiated cookie.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the application name shown by iTerm2.
    pub fn advisory_name(mut self, name: impl Into<String>) -> Self {
        self.advisory_name = Some(name.into());
        self
    }

    /// Whether the server should suppress its own authorization dialog.
    pub fn disable_auth_ui(mut self, disable: bool) -> Self {
        self.disable_auth_ui = disable;
        self
    }

    /// Cookie currently set, if any.
    pub fn cookie_value(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    /// Key currently set, if any.
    pub fn key_value(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Header name/value pairs in the order they should be sent.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("x-iterm2-library-version", self.library_version.clone()),
            (
                "x-iterm2-disable-auth-ui",
                self.disable_auth_ui.to_string(),
            ),
        ];
        if let Some(cookie) = &self.cookie {
            pairs.push(("x-iterm2-cookie", cookie.clone()));
        }
        if let Some(key) = &self.key {
            pairs.push(("x-iterm2-key", key.clone()));
        }
        if let Some(name) = &self.advisory_name {
            pairs.push(("x-iterm2-advisory-name", name.clone()));
        }
        pairs
    }
}

impl Default for HandshakeHeaders {
    fn default() -> Self {
        Self::new(LIBRARY_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_pairs() {
        let pairs = HandshakeHeaders::new("rust 1.0").to_pairs();
        assert_eq!(
            pairs,
            vec![
                ("x-iterm2-library-version", "rust 1.0".to_string()),
                ("x-iterm2-disable-auth-ui", "true".to_string()),
            ]
        );
    }

    #[test]
    fn test_cookie_without_key() {
        let headers = HandshakeHeaders::default().cookie("abc");
        let names: Vec<_> = headers.to_pairs().into_iter().map(|(n, _)| n).collect();

        assert!(names.contains(&"x-iterm2-cookie"));
        assert!(!names.contains(&"x-iterm2-key"));
        assert_eq!(headers.cookie_value(), Some("abc"));
        assert_eq!(headers.key_value(), None);
    }

    #[test]
    fn test_library_version_prefix() {
        assert!(LIBRARY_VERSION.starts_with("rust "));
    }
}
