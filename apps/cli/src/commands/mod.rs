//! Command implementations for the polycap CLI.

pub mod init;
pub mod prepare;
pub mod train;
pub mod types;

pub use types::{PrepareArgs, TrainCommand, TrainRunArgs};
