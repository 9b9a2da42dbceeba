use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid address")]
    InvalidAddr,
    #[error("invalid element type: {0}")]
    InvalidType(&'static str),
    #[error("invalid parameters: {0}")]
    InvalidParams(&'static str),
    #[error("storage is full")]
    Full,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
}
