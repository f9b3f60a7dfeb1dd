use std::{io, path::PathBuf};

use thiserror::Error;

/// Why a download request was not dispatched
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("the URL is empty")]
    BlankUrl,
    #[error("a download is already in progress")]
    Busy,
}

/// Failure of a single download attempt
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("could not create output folder {}: {source}", path.display())]
    OutputDir { path: PathBuf, source: io::Error },

    #[error("could not start {}: {source}", program.display())]
    Spawn { program: PathBuf, source: io::Error },

    #[error("{0}")]
    Failed(String),

    #[error("I/O error while downloading: {0}")]
    Io(#[from] io::Error),

    #[error("download cancelled")]
    Cancelled,
}
