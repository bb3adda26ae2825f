use std::fmt;

/// A portal access token that never appears in formatted output.
///
/// The value is reachable only through [`expose_token`](Self::expose_token).
///
/// # Examples
///
/// ```
/// use sirius_access::PortalToken;
///
/// let token = PortalToken::new("a1b2c3");
/// assert_eq!(format!("{:?}", token), "[REDACTED]");
/// assert_eq!(token.expose_token(), "a1b2c3");
/// ```
// Do NOT derive Clone, Copy, Default or Serialize: each is a path for the token to leak.
pub struct PortalToken {
    inner: String,
}

impl PortalToken {
    /// Wraps a token.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: value.into(),
        }
    }

    /// Explicitly exposes the token, e.g. to put it on the wire.
    pub fn expose_token(&self) -> &str {
        &self.inner
    }
}

impl fmt::Debug for PortalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for PortalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}
