use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("No instance for branch '{0}'")]
    NotFound(String),

    #[error("Catalog conflict for branch '{branch}': {reason}")]
    Conflict { branch: String, reason: String },

    #[error("Catalog entry {} is unreadable: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode catalog entry: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Catalog IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
