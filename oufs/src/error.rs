use thiserror::Error;

#[derive(Error, Debug)]
pub enum OufsError {
    #[error("no free {0} left")]
    Exhausted(&'static str),
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("cannot remove a non-empty directory: {0}")]
    NotEmpty(String),
    #[error("directory block {0} is full")]
    DirectoryFull(u16),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid file system block layout: {0}")]
    InvalidLayout(String),
    #[error("block device I/O failed")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OufsError>;
