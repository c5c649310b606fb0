#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("replica needs at least one peer")]
    NoPeers,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
