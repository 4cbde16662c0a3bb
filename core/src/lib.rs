pub mod config;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod models;
pub mod photo;

pub use db::Database;
pub use error::{Error, Result, StorageError};
