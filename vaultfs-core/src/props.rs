//! File properties
//!
//! Properties are replaced wholesale on every update; there is no per-field
//! mutation.

use serde::{Deserialize, Serialize};

/// Default MIME type for uploads that do not name one
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProperties {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    /// Unix timestamp in milliseconds
    pub modified: i64,
    pub is_directory: bool,
    pub is_hidden: bool,
}

impl FileProperties {
    pub fn file(name: impl Into<String>, mime_type: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size,
            modified: chrono::Utc::now().timestamp_millis(),
            is_directory: false,
            is_hidden: false,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime_type: String::new(),
            size: 0,
            modified: chrono::Utc::now().timestamp_millis(),
            is_directory: true,
            is_hidden: false,
        }
    }

    pub fn hidden(mut self, is_hidden: bool) -> Self {
        self.is_hidden = is_hidden;
        self
    }

    /// Same properties, new size and modification time
    pub fn with_size(&self, size: u64) -> Self {
        Self {
            size,
            modified: chrono::Utc::now().timestamp_millis(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_size_replaces_size_only() {
        let props = FileProperties::file("notes.txt", "text/plain", 10).hidden(true);
        let resized = props.with_size(20);
        assert_eq!(resized.size, 20);
        assert_eq!(resized.name, "notes.txt");
        assert!(resized.is_hidden);
        assert!(!resized.is_directory);
    }
}
