//! Secret redaction for sensitive data in logs, serialization, and display.
//!
//! [`Redacted`] wraps a borrowed value for one-off log fields; [`Secret`]
//! owns a credential string for longer-lived handling. Neither ever exposes
//! its inner value through `Debug`, `Display`, or `Serialize` — all output
//! as `"<redacted>"`. Reading a [`Secret`] requires the explicit
//! [`Secret::expose`] call, which keeps plaintext use sites greppable.

use std::fmt::{self, Debug, Display};

use zeroize::Zeroize;

/// Wrapper that redacts its inner value when formatted or serialized.
///
/// # Example
///
/// ```ignore
/// use mbx_gateway::redact::Redacted;
///
/// tracing::info!(key = %Redacted("sk-12345"), "attaching API key");
/// // Logs: key = <redacted>
/// ```
#[derive(Clone, Copy)]
pub struct Redacted<T>(pub T);

impl<T> Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> serde::Serialize for Redacted<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        "<redacted>".serialize(serializer)
    }
}

/// An owned credential value. The backing string is zeroed on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Plaintext access for explicit use sites (signing, header assembly).
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}
