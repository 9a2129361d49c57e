use serde::{Deserialize, Serialize};

/// A single caption in long format, before language mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionRecord {
    pub id: i64,
    pub file_name: String,
    pub language: String,
    pub caption: String,
}

impl CaptionRecord {
    pub fn new(id: i64, file_name: impl Into<String>, language: impl Into<String>, caption: impl Into<String>) -> Self {
        Self { id, file_name: file_name.into(), language: language.into(), caption: caption.into() }
    }
}

/// A published metadata row.
///
/// Field order is the CSV column order: `id,file_name,language,caption,question,weight`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRow {
    pub id: i64,
    pub file_name: String,
    pub language: String,
    pub caption: String,
    pub question: String,
    pub weight: f64,
}

pub const METADATA_COLUMNS: [&str; 6] = ["id", "file_name", "language", "caption", "question", "weight"];
