//! Polycap Data
//!
//! Preparation of the multilingual image-captioning dataset:
//! - Loading the AfriMMD (wide Parquet) and AViLaData (long CSV) caption sources
//! - Merging, de-duplicating and mapping languages (`prepare_records`)
//! - Rebalancing languages by weighted sampling (`rebalance`)
//! - Writing `metadata.csv`, staging images, and publishing to the Hugging Face Hub

pub mod config;
pub mod error;
pub mod hub;
pub mod images;
pub mod languages;
pub mod metadata;
pub mod pipeline;
pub mod prepare;
pub mod publish;
pub mod record;
pub mod sampling;
pub mod sources;

pub use config::{ImageConfig, PrepareConfig, PublishConfig};
pub use error::{DataError, DataResult};
pub use hub::{CommitInfo, HubClient, HubRepoType, UploadFile, resolve_token};
pub use images::{KaggleClient, KaggleCredentials, StageReport, stage_images};
pub use languages::{Language, LanguageCatalog};
pub use metadata::{METADATA_FILE_NAME, image_path, missing_images, read_metadata, write_metadata};
pub use pipeline::{PrepareReport, prepare_records};
pub use prepare::{PrepareSummary, run_prepare};
pub use publish::{PublishTarget, publish_dataset, write_metadata_parquet};
pub use record::{CaptionRecord, MetadataRow};
pub use sampling::{RebalanceOptions, rebalance, weighted_sample_indices};
pub use sources::{SourceFetcher, SourceLocation};
