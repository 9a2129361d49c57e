//! Loader for the long-format AViLaData caption CSV.

use crate::error::{DataError, DataResult};
use crate::record::CaptionRecord;
use serde::Deserialize;
use std::path::Path;

const REQUIRED_COLUMNS: [&str; 4] = ["id", "image", "language", "caption"];

#[derive(Debug, Deserialize)]
struct AvilaRow {
    id: i64,
    image: String,
    language: String,
    #[serde(default)]
    caption: Option<String>,
}

/// Load AViLaData captions. Extra columns such as the pandas index or `caption_number`
/// are ignored; `image` becomes the record's `file_name`.
pub fn load_avila(path: &Path) -> DataResult<Vec<CaptionRecord>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).flexible(false).from_path(path)?;

    let headers = reader.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(DataError::Schema(format!(
                "column '{column}' not found in {}. Available columns: {:?}",
                path.display(),
                headers.iter().collect::<Vec<_>>()
            )));
        }
    }

    let mut records = Vec::new();
    for (idx, row) in reader.deserialize::<AvilaRow>().enumerate() {
        let row = row.map_err(|e| DataError::Schema(format!("{} line {}: {}", path.display(), idx + 2, e)))?;
        let Some(caption) = row.caption.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()) else {
            continue;
        };
        records.push(CaptionRecord { id: row.id, file_name: row.image, language: row.language, caption });
    }

    tracing::debug!("Loaded {} AViLa captions from {}", records.len(), path.display());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_avila_drops_extra_columns() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("avila.csv");
        std::fs::write(
            &path,
            ",image,caption_number,id,language,caption\n\
             0,1000092795.jpg,0,0,hau,\"karnuka biyu\"\n\
             1,1000092795.jpg,1,0,zul,\n\
             2,10002456.jpg,0,1,swh,\"mtu, na mbwa\"\n",
        )
        .unwrap();

        let records = load_avila(&path).unwrap();
        assert_eq!(
            records,
            vec![
                CaptionRecord::new(0, "1000092795.jpg", "hau", "karnuka biyu"),
                CaptionRecord::new(1, "10002456.jpg", "swh", "mtu, na mbwa"),
            ]
        );
    }

    #[test]
    fn test_load_avila_reports_missing_column() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("avila.csv");
        std::fs::write(&path, "id,language,caption\n0,hau,x\n").unwrap();

        let err = load_avila(&path).unwrap_err();
        assert!(err.to_string().contains("'image'"));
    }
}
