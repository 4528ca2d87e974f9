//! Prompt template repository.
//!
//! System prompts live as plain text files under a configurable root,
//! addressed by identifiers such as `builtin/system/en/translate-to-pl`.

use std::path::{Path, PathBuf};

use crate::core::error::{Result, RouterError};

/// File-tree backed prompt lookup.
#[derive(Debug, Clone)]
pub struct PromptStore {
    root: PathBuf,
}

impl PromptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PromptStore { root: root.into() }
    }

    /// Fetch a prompt template by identifier.
    ///
    /// The identifier maps to `<root>/<id>.txt`, falling back to a file
    /// without the extension. Path traversal segments are rejected.
    pub fn get(&self, prompt_id: &str) -> Result<String> {
        if prompt_id.split('/').any(|seg| seg == "..") {
            return Err(RouterError::PromptNotFound(prompt_id.to_string()));
        }

        let with_ext = self.root.join(format!("{}.txt", prompt_id));
        let plain = self.root.join(prompt_id);

        let path: &Path = if with_ext.is_file() {
            &with_ext
        } else if plain.is_file() {
            &plain
        } else {
            return Err(RouterError::PromptNotFound(prompt_id.to_string()));
        };

        std::fs::read_to_string(path)
            .map(|text| text.trim_end().to_string())
            .map_err(|_| RouterError::PromptNotFound(prompt_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn store_with_prompt(id: &str, text: &str) -> (tempfile::TempDir, PromptStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("{}.txt", id));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, text).unwrap();
        let store = PromptStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_get_prompt() {
        let (_dir, store) = store_with_prompt("builtin/system/en/greet", "You are helpful.\n");
        let text = store.get("builtin/system/en/greet").unwrap();
        assert_eq!(text, "You are helpful.");
    }

    #[test]
    fn test_missing_prompt() {
        let (_dir, store) = store_with_prompt("a", "x");
        let err = store.get("b").unwrap_err();
        assert!(matches!(err, RouterError::PromptNotFound(_)));
    }

    #[test]
    fn test_traversal_rejected() {
        let (_dir, store) = store_with_prompt("a", "x");
        assert!(store.get("../etc/passwd").is_err());
    }

    #[test]
    fn test_extensionless_fallback() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("raw-prompt"), "raw").unwrap();
        let store = PromptStore::new(dir.path());
        assert_eq!(store.get("raw-prompt").unwrap(), "raw");
    }
}
