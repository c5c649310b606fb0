#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid HOST:PORT argument: {0}")]
    InvalidAddress(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("input is not valid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}
