use crate::error::{DataError, DataResult};
use crate::record::{MetadataRow, METADATA_COLUMNS};
use std::path::{Path, PathBuf};

pub const METADATA_FILE_NAME: &str = "metadata.csv";

pub fn write_metadata(path: &Path, rows: &[MetadataRow]) -> DataResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::WriterBuilder::new().has_headers(true).from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_metadata(path: &Path) -> DataResult<Vec<MetadataRow>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;

    let headers = reader.headers()?.clone();
    let missing: Vec<&str> = METADATA_COLUMNS.iter().copied().filter(|c| !headers.iter().any(|h| h == *c)).collect();
    if !missing.is_empty() {
        return Err(DataError::Schema(format!("{} is missing columns {:?}", path.display(), missing)));
    }

    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Rows whose image file is not present under `image_dir`.
pub fn missing_images<'a>(rows: &'a [MetadataRow], image_dir: &Path) -> Vec<&'a MetadataRow> {
    rows.iter().filter(|r| !image_path(image_dir, r).is_file()).collect()
}

pub fn image_path(image_dir: &Path, row: &MetadataRow) -> PathBuf {
    image_dir.join(&row.file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_rows() -> Vec<MetadataRow> {
        vec![
            MetadataRow {
                id: 4,
                file_name: "1.jpg".to_string(),
                language: "sw".to_string(),
                caption: "mbwa wawili, wanacheza".to_string(),
                question: "maelezo ya picha hii".to_string(),
                weight: 0.1,
            },
            MetadataRow {
                id: 9,
                file_name: "2.jpg".to_string(),
                language: "ha".to_string(),
                caption: "karnuka \"biyu\"".to_string(),
                question: "rubutun wannan hoton".to_string(),
                weight: 0.0,
            },
        ]
    }

    #[test]
    fn test_metadata_header_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data").join(METADATA_FILE_NAME);
        write_metadata(&path, &sample_rows()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().next(), Some("id,file_name,language,caption,question,weight"));
        assert_eq!(read_metadata(&path).unwrap(), sample_rows());
    }

    #[test]
    fn test_read_metadata_rejects_missing_columns() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(METADATA_FILE_NAME);
        std::fs::write(&path, "id,file_name,caption\n1,a.jpg,x\n").unwrap();

        let err = read_metadata(&path).unwrap_err();
        assert!(err.to_string().contains("language"));
    }

    #[test]
    fn test_missing_images() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("1.jpg"), b"jpg").unwrap();
        let rows = sample_rows();
        let missing = missing_images(&rows, temp.path());
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].file_name, "2.jpg");
    }
}
