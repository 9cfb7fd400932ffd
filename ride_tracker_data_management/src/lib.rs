use const_format::concatcp;
use thiserror::Error;

pub mod database;
mod data_manager;

pub use data_manager::*;

pub const DATA_DIR: &str = "data/";
pub const DATABASE_PATH: &str = concatcp!(DATA_DIR, "rides.db");

#[derive(Error, Debug)]
pub enum DataManagerError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Data directory error: {0}")]
    DataDir(String),
}
