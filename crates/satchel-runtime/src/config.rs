//! Startup configuration stored in the container root.
//!
//! ```text
//! # comment
//! com.example.Main
//! libA
//! libB
//! ```
//!
//! The first meaningful line names the entry unit; every following line is a
//! bundle identifier, highest priority first.

use std::io::Read;

use crate::container::ResourceStore;
use crate::error::RuntimeError;

/// Container path of the startup configuration.
pub const CONFIG_RESOURCE: &str = "satchel.conf";

/// Parsed startup configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupConfig {
    entry: String,
    bundles: Vec<String>,
}

impl StartupConfig {
    /// Create a configuration directly.
    pub fn new(entry: impl Into<String>, bundles: Vec<String>) -> Self {
        Self {
            entry: entry.into(),
            bundles,
        }
    }

    /// Parse configuration text.
    pub fn parse(text: &str) -> Result<Self, RuntimeError> {
        let mut lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'));

        let entry = lines.next().ok_or_else(|| {
            RuntimeError::ConfigMalformed("no entry unit named in startup configuration".into())
        })?;

        Ok(Self {
            entry: entry.to_string(),
            bundles: lines.map(String::from).collect(),
        })
    }

    /// Read and parse [`CONFIG_RESOURCE`] from the container root.
    pub fn read_from(store: &dyn ResourceStore) -> Result<Self, RuntimeError> {
        let mut stream = store.open(CONFIG_RESOURCE).ok_or_else(|| {
            RuntimeError::ConfigMalformed(format!("{} not found in container", CONFIG_RESOURCE))
        })?;

        let mut text = String::new();
        stream.read_to_string(&mut text).map_err(|e| {
            RuntimeError::ConfigMalformed(format!("{} is unreadable: {}", CONFIG_RESOURCE, e))
        })?;
        Self::parse(&text)
    }

    /// Qualified name of the entry unit
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Bundle identifiers in priority order
    pub fn bundles(&self) -> &[String] {
        &self.bundles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let config = StartupConfig::parse(
            "# launcher\n\n  com.example.Main  \nlibA\n# disabled\n\r\nlibB\n",
        )
        .unwrap();

        assert_eq!(config.entry(), "com.example.Main");
        assert_eq!(config.bundles(), ["libA", "libB"]);
    }

    #[test]
    fn test_parse_entry_without_bundles() {
        let config = StartupConfig::parse("Main").unwrap();
        assert_eq!(config.entry(), "Main");
        assert!(config.bundles().is_empty());
    }

    #[test]
    fn test_parse_requires_entry() {
        for text in ["", "\n\n", "# only a comment\n"] {
            assert!(matches!(
                StartupConfig::parse(text),
                Err(RuntimeError::ConfigMalformed(_))
            ));
        }
    }

    #[test]
    fn test_read_from_store() {
        let store = Container::from_entries(vec![(
            CONFIG_RESOURCE.to_string(),
            b"app.Main\nlibA\n".to_vec(),
        )]);
        let config = StartupConfig::read_from(&store).unwrap();
        assert_eq!(config, StartupConfig::new("app.Main", vec!["libA".into()]));

        assert!(matches!(
            StartupConfig::read_from(&Container::empty()),
            Err(RuntimeError::ConfigMalformed(_))
        ));
    }

    #[test]
    fn test_read_from_rejects_non_utf8() {
        let store = Container::from_entries(vec![(CONFIG_RESOURCE.to_string(), vec![0xff, 0xfe])]);
        assert!(matches!(
            StartupConfig::read_from(&store),
            Err(RuntimeError::ConfigMalformed(_))
        ));
    }
}
