use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Dir,
    Unknown,
}

impl FileType {
    pub fn is_dir(self) -> bool {
        self == FileType::Dir
    }

    pub fn is_file(self) -> bool {
        self == FileType::File
    }
}

/// One remote entry as reported by a listing or a mutating call.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FileMetadata {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    #[serde(default)]
    pub size: u64,
    /// Unix seconds of the last remote modification.
    #[serde(default)]
    pub modified: Option<i64>,
}

impl FileMetadata {
    pub fn new(path: impl Into<String>, file_type: FileType) -> Self {
        let path = path.into();
        let name = path
            .rsplit('/')
            .find(|part| !part.is_empty())
            .unwrap_or_default()
            .to_string();
        Self {
            path,
            name,
            file_type,
            size: 0,
            modified: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_modified(mut self, modified: i64) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Path of the folder holding this entry, `/` for top-level entries.
    pub fn containing_path(&self) -> String {
        let trimmed = self.path.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => trimmed[..idx].to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_name_and_containing_path() {
        let meta = FileMetadata::new("/alice/docs/report.txt", FileType::File);
        assert_eq!(meta.name, "report.txt");
        assert_eq!(meta.containing_path(), "/alice/docs");

        let top = FileMetadata::new("/alice", FileType::Dir);
        assert_eq!(top.name, "alice");
        assert_eq!(top.containing_path(), "/");
    }

    #[test]
    fn deserializes_lowercase_type_tag() {
        let meta: FileMetadata = serde_json::from_value(serde_json::json!({
            "path": "/alice/a",
            "name": "a",
            "type": "dir"
        }))
        .unwrap();
        assert_eq!(meta.file_type, FileType::Dir);
        assert_eq!(meta.size, 0);
        assert_eq!(meta.modified, None);
    }
}
