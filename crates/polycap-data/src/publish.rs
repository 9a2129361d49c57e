use crate::error::{DataError, DataResult};
use crate::hub::{CommitInfo, HubClient, HubRepoType, UploadFile};
use crate::record::MetadataRow;
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use std::path::Path;
use std::sync::Arc;

/// Single-shard train split, matching the layout `datasets` expects on the hub.
pub const TRAIN_SHARD_PATH: &str = "data/train-00000-of-00001.parquet";

fn metadata_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("file_name", DataType::Utf8, false),
        Field::new("language", DataType::Utf8, false),
        Field::new("caption", DataType::Utf8, false),
        Field::new("question", DataType::Utf8, false),
        Field::new("weight", DataType::Float64, false),
    ]))
}

pub fn write_metadata_parquet(path: &Path, rows: &[MetadataRow]) -> DataResult<()> {
    let schema = metadata_schema();
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(rows.iter().map(|r| r.id).collect::<Vec<_>>())),
        Arc::new(StringArray::from(rows.iter().map(|r| r.file_name.as_str()).collect::<Vec<_>>())),
        Arc::new(StringArray::from(rows.iter().map(|r| r.language.as_str()).collect::<Vec<_>>())),
        Arc::new(StringArray::from(rows.iter().map(|r| r.caption.as_str()).collect::<Vec<_>>())),
        Arc::new(StringArray::from(rows.iter().map(|r| r.question.as_str()).collect::<Vec<_>>())),
        Arc::new(Float64Array::from(rows.iter().map(|r| r.weight).collect::<Vec<_>>())),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub repo_id: String,
    pub private: bool,
    pub revision: String,
}

/// Export rows as a parquet train split and commit it to a dataset repository.
pub async fn publish_dataset(
    hub: &HubClient,
    target: &PublishTarget,
    rows: &[MetadataRow],
    staging_dir: &Path,
) -> DataResult<CommitInfo> {
    if rows.is_empty() {
        return Err(DataError::Publish("refusing to publish an empty dataset".to_string()));
    }

    let shard = staging_dir.join("train-00000-of-00001.parquet");
    write_metadata_parquet(&shard, rows)?;

    hub.create_repo(&target.repo_id, HubRepoType::Dataset, target.private).await?;
    let files = vec![UploadFile { local_path: shard, path_in_repo: TRAIN_SHARD_PATH.to_string() }];
    let summary = format!("Upload {} captions", rows.len());
    hub.upload_files(&target.repo_id, HubRepoType::Dataset, &target.revision, &files, &summary).await
}
