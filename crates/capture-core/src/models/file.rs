//! File model

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::entity::Entity;

/// File metadata attached to a row field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    /// Row the file belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    /// Field of the row holding the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    /// Original file name
    pub filename: String,
    /// Download location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Content version, bumped on every upload
    #[serde(default)]
    pub version: u32,
}

impl File {
    /// Create file metadata for a row field.
    pub fn new(
        row_id: impl Into<String>,
        field_id: impl Into<String>,
        filename: impl Into<String>,
    ) -> Result<Self> {
        let file = Self {
            row_id: Some(row_id.into().trim().to_string()),
            field_id: Some(field_id.into().trim().to_string()),
            filename: filename.into().trim().to_string(),
            url: None,
            version: 1,
        };
        file.validate()?;
        Ok(file)
    }
}

impl Entity for File {
    const TABLE: &'static str = "files";

    fn validate(&self) -> Result<()> {
        if self.filename.is_empty() {
            return Err(Error::InvalidInput(
                "File filename cannot be empty".to_string(),
            ));
        }
        if self.row_id.as_deref().is_some_and(str::is_empty) {
            return Err(Error::InvalidInput("File row_id cannot be empty".to_string()));
        }
        if self.field_id.as_deref().is_some_and(str::is_empty) {
            return Err(Error::InvalidInput(
                "File field_id cannot be empty".to_string(),
            ));
        }
        if let Some(url) = &self.url {
            if !crate::util::is_http_url(url) {
                return Err(Error::InvalidInput(
                    "File url must include http:// or https://".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_new() {
        let file = File::new("row-1", "photo", " oak.jpg ").unwrap();

        assert_eq!(file.filename, "oak.jpg");
        assert_eq!(file.row_id.as_deref(), Some("row-1"));
        assert_eq!(file.version, 1);
    }

    #[test]
    fn test_file_validation() {
        assert!(File::new("row-1", "photo", "").is_err());
        assert!(File::new("", "photo", "oak.jpg").is_err());
        assert!(File::new("row-1", " ", "oak.jpg").is_err());

        let mut file = File::new("row-1", "photo", "oak.jpg").unwrap();
        file.url = Some("ftp://example.com/oak.jpg".to_string());
        assert!(file.to_payload().is_err());
    }

    #[test]
    fn test_file_payload_roundtrip() {
        let mut file = File::new("row-1", "photo", "oak.jpg").unwrap();
        file.url = Some("https://files.example.com/oak.jpg".to_string());

        let payload = file.to_payload().unwrap();
        assert_eq!(File::from_payload(&payload).unwrap(), file);
    }
}
