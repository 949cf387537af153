use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to socket `{path}`: {source}")]
    SocketConnect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP handshake with `{path}` failed: {source}")]
    Handshake {
        path: PathBuf,
        #[source]
        source: hyper::Error,
    },
    #[error("failed to build request for `{uri}`: {source}")]
    BuildRequest {
        uri: String,
        #[source]
        source: hyper::http::Error,
    },
    #[error("request `{uri}` failed: {source}")]
    Request {
        uri: String,
        #[source]
        source: hyper::Error,
    },
    #[error("request `{uri}` returned {status}: {body}")]
    Status {
        uri: String,
        status: hyper::StatusCode,
        body: String,
    },
    #[error("failed to decode response of `{uri}`: {source}")]
    Decode {
        uri: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
