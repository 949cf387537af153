use std::path::Path;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;

use super::{Error, Result};

/// Opens a fresh HTTP/1.1 connection over the unix socket at `path`.
///
/// The connection driver runs on its own task and ends once the returned sender and every
/// response body are dropped.
pub(super) async fn connect_unix(path: &Path) -> Result<SendRequest<Empty<Bytes>>> {
    log::trace!("Connecting to {}...", path.display());
    let stream = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|source| Error::SocketConnect {
            path: path.to_path_buf(),
            source,
        })?;

    let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|source| Error::Handshake {
            path: path.to_path_buf(),
            source,
        })?;
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            log::debug!("connection closed with error: {}", err);
        }
    });

    Ok(sender)
}

/// Sends a GET request for `uri` (origin form, e.g. `/containers/json`) on a new connection.
pub(super) async fn get(socket: &Path, uri: &str) -> Result<Response<Incoming>> {
    let mut sender = connect_unix(socket).await?;
    let request = Request::get(uri)
        .header(hyper::header::HOST, "docker")
        .body(Empty::<Bytes>::new())
        .map_err(|source| Error::BuildRequest {
            uri: uri.to_owned(),
            source,
        })?;

    sender
        .send_request(request)
        .await
        .map_err(|source| Error::Request {
            uri: uri.to_owned(),
            source,
        })
}

/// Reads the complete response body.
pub(super) async fn collect_body(uri: &str, response: Response<Incoming>) -> Result<Bytes> {
    response
        .into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|source| Error::Request {
            uri: uri.to_owned(),
            source,
        })
}

/// Turns a non-success response into [`Error::Status`] carrying the response body.
pub(super) async fn error_for_status(uri: &str, response: Response<Incoming>) -> Error {
    let status = response.status();
    let body = match collect_body(uri, response).await {
        Ok(body) => String::from_utf8_lossy(&body).trim().to_owned(),
        Err(err) => err.to_string(),
    };
    Error::Status {
        uri: uri.to_owned(),
        status,
        body,
    }
}
