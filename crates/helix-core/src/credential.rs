use std::fmt;

/// An API key, bearer token, or similar secret received once at adapter
/// construction (§4.1). Never implements a `Debug`/`Display` that prints
/// the raw value — logging a `Credential` directly always redacts it.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Returns the raw secret, for use in an `Authorization` header or
    /// signing step. Never pass the result of this to a logger.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***redacted***)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***redacted***")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_display_never_leak_the_secret() {
        let cred = Credential::new("sk-super-secret");
        assert_eq!(format!("{:?}", cred), "Credential(***redacted***)");
        assert_eq!(format!("{}", cred), "***redacted***");
        assert_eq!(cred.expose(), "sk-super-secret");
    }
}
