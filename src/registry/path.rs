//! Stream identity

use super::error::RegistryError;

/// Hierarchical stream identifier, `app/name`
///
/// `name` may itself contain `/` (`live/room/cam1`). Segments are non-empty
/// and use only ASCII alphanumerics, `-`, `_` and `.`; `.` and `..` segments
/// are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamPath {
    /// Application name (e.g., "live")
    pub app: String,
    /// Stream name below the app
    pub name: String,
}

impl StreamPath {
    /// Create a path from already validated parts
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
        }
    }

    /// Validate and split `app/name`
    pub fn parse(path: &str) -> Result<Self, RegistryError> {
        let invalid = || RegistryError::InvalidPath(path.to_string());
        let (app, name) = path.split_once('/').ok_or_else(invalid)?;
        if !valid_segment(app) || !name.split('/').all(valid_segment) {
            return Err(invalid());
        }
        Ok(Self::new(app, name))
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

impl std::fmt::Display for StreamPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.app, self.name)
    }
}

impl std::str::FromStr for StreamPath {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
