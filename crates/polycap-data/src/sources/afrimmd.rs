//! Loader for the wide-format AfriMMD Parquet table.
//!
//! Each row holds one image and one caption column per language; the loader melts it
//! into one [`CaptionRecord`] per (row, language).

use crate::error::{DataError, DataResult};
use crate::record::CaptionRecord;
use arrow::array::{Array, ArrayRef, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::path::Path;

const ID_COLUMN: &str = "id";
const IMAGE_COLUMN: &str = "image_id";

pub fn load_afrimmd(path: &Path) -> DataResult<Vec<CaptionRecord>> {
    let file = std::fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let schema = builder.schema().clone();
    let column_names: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
    let id_idx = column_index(&column_names, ID_COLUMN)?;
    let image_idx = column_index(&column_names, IMAGE_COLUMN)?;
    let language_columns: Vec<(usize, String)> = column_names
        .iter()
        .enumerate()
        .filter(|(_, name)| name.as_str() != ID_COLUMN && name.as_str() != IMAGE_COLUMN)
        .map(|(idx, name)| (idx, name.clone()))
        .collect();

    if language_columns.is_empty() {
        return Err(DataError::Schema(format!("{} has no language columns", path.display())));
    }

    // Melt is language-major: every row for the first language, then the next.
    let mut per_language: Vec<Vec<CaptionRecord>> = vec![Vec::new(); language_columns.len()];

    for batch in builder.build()? {
        let batch = batch?;
        let ids = as_strings(batch.column(id_idx))?;
        let images = as_strings(batch.column(image_idx))?;
        let ids = downcast(&ids, ID_COLUMN)?;
        let images = downcast(&images, IMAGE_COLUMN)?;

        for (slot, (col_idx, language)) in language_columns.iter().enumerate() {
            let captions = as_strings(batch.column(*col_idx))?;
            let captions = downcast(&captions, language)?;

            for row in 0..batch.num_rows() {
                if captions.is_null(row) || ids.is_null(row) || images.is_null(row) {
                    continue;
                }
                let caption = captions.value(row).trim();
                if caption.is_empty() {
                    continue;
                }
                per_language[slot].push(CaptionRecord {
                    id: parse_id(ids.value(row))?,
                    file_name: image_file_name(images.value(row)),
                    language: language.clone(),
                    caption: caption.to_string(),
                });
            }
        }
    }

    let records: Vec<CaptionRecord> = per_language.into_iter().flatten().collect();
    tracing::debug!("Loaded {} AfriMMD captions from {}", records.len(), path.display());
    Ok(records)
}

/// `"1000092795_0"` names the first caption of image `1000092795.jpg`.
pub fn image_file_name(image_id: &str) -> String {
    let stem = image_id.split('_').next().unwrap_or(image_id);
    format!("{stem}.jpg")
}

fn column_index(columns: &[String], name: &str) -> DataResult<usize> {
    columns
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| DataError::Schema(format!("column '{name}' not found. Available columns: {columns:?}")))
}

fn as_strings(array: &ArrayRef) -> DataResult<ArrayRef> {
    Ok(cast(array.as_ref(), &DataType::Utf8)?)
}

fn downcast<'a>(array: &'a ArrayRef, column: &str) -> DataResult<&'a StringArray> {
    array
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| DataError::Schema(format!("column '{column}' is not castable to utf8")))
}

fn parse_id(raw: &str) -> DataResult<i64> {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<i64>() {
        return Ok(id);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Ok(v as i64),
        _ => Err(DataError::Schema(format!("id '{raw}' is not an integer"))),
    }
}
