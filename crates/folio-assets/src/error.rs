use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("asset {url} is not read-locked by this holder")]
    NotLocked { url: String },
    #[error("asset {url} has no content yet")]
    NoContent { url: String },
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AssetError>;
