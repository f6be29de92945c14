use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A mutation was attempted without a verified admin credential.
    #[error("admin session required")]
    NotAdmin,
    #[error("admin password rejected")]
    AuthRejected,
    #[error("backend responded {status}: {message}")]
    Backend { status: u16, message: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("unknown node {0}")]
    UnknownNode(String),
    #[error("invalid story: {0}")]
    InvalidStory(String),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}
