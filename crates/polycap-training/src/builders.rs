use crate::dataset::{compute_dataset_id, validate_examples, CaptionExample, Dataset, DatasetId, DatasetSource};
use crate::error::{TrainingError, TrainingResult};
use crate::job::PromptTemplate;
use polycap_data::{image_path, read_metadata, MetadataRow};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct DatasetBuildOptions {
    pub prompt: PromptTemplate,
    /// Truncate the dataset (smoke runs).
    pub max_examples: Option<usize>,
    /// Fail when an example's image is missing on disk.
    pub require_images: bool,
}

impl Default for DatasetBuildOptions {
    fn default() -> Self {
        Self { prompt: PromptTemplate::default(), max_examples: None, require_images: true }
    }
}

/// Build a dataset from a `DatasetSource`.
pub fn build_dataset(source: &DatasetSource, options: &DatasetBuildOptions) -> TrainingResult<(Dataset, DatasetId)> {
    let mut examples = match source {
        DatasetSource::Metadata { csv, image_dir } => build_from_metadata(csv, image_dir, options)?,
        DatasetSource::Jsonl { path } => read_jsonl_dataset(path)?,
    };

    if let Some(max) = options.max_examples {
        examples.truncate(max);
    }
    if options.require_images {
        ensure_images_exist(&examples)?;
    }

    validate_examples(&examples)?;
    let id = compute_dataset_id(&examples)?;
    Ok((examples, id))
}

pub fn example_from_row(row: &MetadataRow, image_dir: &Path, prompt: &PromptTemplate) -> CaptionExample {
    CaptionExample {
        prefix: prompt.render(&row.language, &row.question),
        suffix: row.caption.clone(),
        image: image_path(image_dir, row),
        language: row.language.clone(),
    }
}

fn build_from_metadata(csv: &Path, image_dir: &Path, options: &DatasetBuildOptions) -> TrainingResult<Dataset> {
    if !csv.is_file() {
        return Err(TrainingError::Dataset(format!("metadata file does not exist: {}", csv.display())));
    }
    let rows = read_metadata(csv)?;
    tracing::debug!("Read {} metadata rows from {}", rows.len(), csv.display());
    Ok(rows.iter().map(|r| example_from_row(r, image_dir, &options.prompt)).collect())
}

fn ensure_images_exist(examples: &[CaptionExample]) -> TrainingResult<()> {
    let missing: Vec<&CaptionExample> = examples.iter().filter(|e| !e.image.is_file()).collect();
    if missing.is_empty() {
        return Ok(());
    }
    let preview: Vec<String> = missing.iter().take(5).map(|e| e.image.display().to_string()).collect();
    Err(TrainingError::Dataset(format!(
        "{} example(s) reference missing images, e.g. {}",
        missing.len(),
        preview.join(", ")
    )))
}

pub fn write_jsonl_dataset(path: &Path, examples: &[CaptionExample]) -> TrainingResult<()> {
    let mut out = String::new();
    for ex in examples {
        out.push_str(&serde_json::to_string(ex)?);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}

pub fn read_jsonl_dataset(path: &Path) -> TrainingResult<Dataset> {
    let contents = std::fs::read_to_string(path)?;
    let mut dataset = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let ex: CaptionExample = serde_json::from_str(line).map_err(|e| {
            TrainingError::Dataset(format!("failed to parse jsonl line {}: {}", idx + 1, e))
        })?;
        dataset.push(ex);
    }

    Ok(dataset)
}
