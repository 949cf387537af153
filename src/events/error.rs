#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("event router is already started")]
    AlreadyStarted,
    #[error("failed to subscribe to container events: {0}")]
    Subscribe(#[source] crate::runtime::Error),
    #[error("failed to list containers for replay: {0}")]
    Replay(#[source] crate::runtime::Error),
    #[error("event router is no longer accepting events")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;
