use std::fmt;

use thiserror::Error;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OriginError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("url {0} has an opaque origin")]
    Opaque(String),
}

/// Identifier for one document-retrieval session.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a top-level window handed out by the windowing environment.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct WindowId(pub Uuid);

impl WindowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WindowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheme, host and port of a URL in its ASCII serialization
/// (`https://docs.example.com`, `http://localhost:8080`).
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Origin(String);

impl Origin {
    pub fn from_url(url: &Url) -> Result<Self, OriginError> {
        let origin = url.origin();
        if !origin.is_tuple() {
            return Err(OriginError::Opaque(url.to_string()));
        }
        Ok(Self(origin.ascii_serialization()))
    }

    pub fn parse(raw: &str) -> Result<Self, OriginError> {
        let url = Url::parse(raw).map_err(|err| OriginError::InvalidUrl(err.to_string()))?;
        Self::from_url(&url)
    }

    /// The `null` origin browsers report for sandboxed or `data:` documents.
    pub fn opaque() -> Self {
        Self("null".to_string())
    }

    pub fn is_opaque(&self) -> bool {
        self.0 == "null"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_drops_path_and_query() {
        let origin = Origin::parse("https://docs.example.com/capture?tenant=42#top").unwrap();
        assert_eq!(origin.as_str(), "https://docs.example.com");
    }

    #[test]
    fn origin_keeps_non_default_port() {
        let origin = Origin::parse("http://localhost:8080/popup").unwrap();
        assert_eq!(origin.as_str(), "http://localhost:8080");

        let default_port = Origin::parse("https://example.com:443/").unwrap();
        assert_eq!(default_port.as_str(), "https://example.com");
    }

    #[test]
    fn opaque_origins_are_rejected() {
        let err = Origin::parse("data:text/html,hello").unwrap_err();
        assert!(matches!(err, OriginError::Opaque(_)));
        assert!(Origin::opaque().is_opaque());
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(
            Origin::parse("not a url"),
            Err(OriginError::InvalidUrl(_))
        ));
    }
}
