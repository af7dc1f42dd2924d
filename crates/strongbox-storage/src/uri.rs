use std::{fmt, sync::Arc};

/// Default separator between component and table in a config URI.
pub const DEFAULT_SEPARATOR: char = '/';

/// Maps a config URI onto a `(component, table)` pair.
pub trait UriMapper: Send + Sync {
    /// Returns `None` when the URI cannot be mapped.
    fn extract(&self, config_uri: &str) -> Option<(String, String)>;
}

/// Splits `component<sep>table` at the first separator. Both halves must be
/// non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UriMapping {
    separator: char,
}

impl UriMapping {
    pub fn new(separator: char) -> Self {
        Self { separator }
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn shared(self) -> Arc<dyn UriMapper> {
        Arc::new(self)
    }
}

impl Default for UriMapping {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

impl fmt::Display for UriMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component{}table", self.separator)
    }
}

impl UriMapper for UriMapping {
    fn extract(&self, config_uri: &str) -> Option<(String, String)> {
        let (component, table) = config_uri.split_once(self.separator)?;
        if component.is_empty() || table.is_empty() {
            return None;
        }
        Some((component.to_string(), table.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_first_separator() {
        let mapping = UriMapping::default();
        assert_eq!(
            mapping.extract("component/config"),
            Some(("component".into(), "config".into()))
        );
        assert_eq!(
            mapping.extract("a/b/c"),
            Some(("a".into(), "b/c".into()))
        );
    }

    #[test]
    fn rejects_uris_without_both_halves() {
        let mapping = UriMapping::default();
        assert_eq!(mapping.extract("component"), None);
        assert_eq!(mapping.extract("/config"), None);
        assert_eq!(mapping.extract("component/"), None);
    }

    #[test]
    fn custom_separator() {
        let mapping = UriMapping::new(':');
        assert_eq!(mapping.to_string(), "component:table");
        assert_eq!(
            mapping.extract("lwa:auth"),
            Some(("lwa".into(), "auth".into()))
        );
        assert_eq!(mapping.extract("lwa/auth"), None);
    }
}
