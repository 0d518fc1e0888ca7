//! Remote endpoint description.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use zeroize::Zeroize;

use crate::{Error, Result};

/// Credential wrapper that zeroizes on drop and never prints its value.
#[derive(Clone, Zeroize, Serialize, Deserialize, PartialEq, Eq)]
#[zeroize(drop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a credential.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the credential for the wire.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

/// Connection parameters of a remote instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    /// Base URL, e.g. `https://erp.example.com`.
    pub url: String,
    /// Database name on the remote server.
    pub database: String,
    /// Login.
    pub username: String,
    /// Password or API key.
    pub credential: Secret,
}

impl Endpoint {
    /// Create a new endpoint description.
    pub fn new(
        url: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        credential: Secret,
    ) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            username: username.into(),
            credential,
        }
    }

    /// Check the endpoint before it is saved.
    ///
    /// # Errors
    /// - URL does not parse or uses a scheme other than http/https
    /// - Database, username or credential is empty
    pub fn validate(&self) -> Result<()> {
        let parsed = Url::parse(self.url.trim())
            .map_err(|e| Error::Validation(format!("Invalid URL '{}': {}", self.url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Validation(
                "URL must start with http:// or https://".to_string(),
            ));
        }
        if self.database.trim().is_empty() {
            return Err(Error::Validation("Database name is required".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(Error::Validation("Username is required".to_string()));
        }
        if self.credential.is_empty() {
            return Err(Error::Validation("Credential is required".to_string()));
        }
        Ok(())
    }

    /// Base URL used for connecting.
    ///
    /// Trailing slashes are removed and a missing scheme defaults to https.
    pub fn base_url(&self) -> String {
        let url = self.url.trim().trim_end_matches('/');
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{}", url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(url: &str) -> Endpoint {
        Endpoint::new(url, "prod", "admin", Secret::new("hunter2"))
    }

    #[test]
    fn test_validate_accepts_http_and_https() {
        assert!(endpoint("https://erp.example.com").validate().is_ok());
        assert!(endpoint("http://localhost:8069").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_scheme() {
        let err = endpoint("erp.example.com").validate().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(endpoint("ftp://erp.example.com").validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_credential() {
        let ep = Endpoint::new("https://erp.example.com", "prod", "admin", Secret::new(""));
        assert!(ep.validate().is_err());
    }

    #[test]
    fn test_base_url_normalization() {
        assert_eq!(endpoint("https://erp.example.com/").base_url(), "https://erp.example.com");
        assert_eq!(endpoint(" erp.example.com ").base_url(), "https://erp.example.com");
    }

    proptest::proptest! {
        #[test]
        fn prop_base_url_has_scheme_and_no_trailing_slash(host in "[a-z]{1,12}(\\.[a-z]{2,5})?/{0,3}") {
            let base = endpoint(&host).base_url();
            proptest::prop_assert!(base.starts_with("https://"));
            proptest::prop_assert!(!base.ends_with('/'));
        }
    }

    #[test]
    fn test_secret_is_redacted() {
        let ep = endpoint("https://erp.example.com");
        let printed = format!("{:?}", ep);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("REDACTED"));
    }
}
