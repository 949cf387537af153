use std::path::{Path, PathBuf};
use std::time::Duration;

use http_body_util::BodyExt;
use hyper::StatusCode;
use tokio::sync::mpsc;

use crate::container::{ContainerID, ContainerInspect, ContainerSummary};

use super::event::parse_event_line;
use super::{ContainerEvent, Error, EventSource, Result, Runtime, Subscription, http};

/// `filters={"type":["container"]}`, url encoded.
const EVENTS_URI: &str = "/events?filters=%7B%22type%22%3A%5B%22container%22%5D%7D";
const EVENTS_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Docker engine API client talking HTTP over the engine's unix socket.
#[derive(Debug, Clone)]
pub struct DockerClient {
    socket_path: PathBuf,
}

impl DockerClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, uri: &str) -> Result<Option<T>> {
        let response = http::get(&self.socket_path, uri).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = http::collect_body(uri, response).await?;
                serde_json::from_slice(&body)
                    .map(Some)
                    .map_err(|source| Error::Decode {
                        uri: uri.to_owned(),
                        source,
                    })
            }
            _ => Err(http::error_for_status(uri, response).await),
        }
    }
}

impl Runtime for DockerClient {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        Ok(self
            .get_json("/containers/json?all=1")
            .await?
            .unwrap_or_default())
    }

    async fn inspect(&self, id: &ContainerID) -> Result<Option<ContainerInspect>> {
        self.get_json(&format!("/containers/{}/json", id)).await
    }
}

impl EventSource for DockerClient {
    async fn subscribe(&self, tx: mpsc::Sender<ContainerEvent>) -> Result<Subscription> {
        let socket_path = self.socket_path.clone();
        // Fail early if the engine is not reachable at all.
        http::connect_unix(&socket_path).await?;

        let task = tokio::spawn(async move {
            loop {
                match stream_events(&socket_path, &tx).await {
                    Ok(()) if tx.is_closed() => {
                        log::debug!("Event receiver dropped, stopping event subscription");
                        return;
                    }
                    Ok(()) => log::warn!("Event stream ended, reconnecting"),
                    Err(err) => log::error!("Event stream failed, reconnecting: {}", err),
                }
                tokio::time::sleep(EVENTS_RECONNECT_DELAY).await;
            }
        });

        Ok(Subscription::new(task))
    }
}

/// Forwards events from one events request until the stream ends or the receiver is gone.
async fn stream_events(socket: &Path, tx: &mpsc::Sender<ContainerEvent>) -> Result<()> {
    let response = http::get(socket, EVENTS_URI).await?;
    if !response.status().is_success() {
        return Err(http::error_for_status(EVENTS_URI, response).await);
    }
    log::info!("Subscribed to container events on {}", socket.display());

    let mut body = response.into_body();
    let mut buffer: Vec<u8> = Vec::with_capacity(4096);
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|source| Error::Request {
            uri: EVENTS_URI.to_owned(),
            source,
        })?;
        let Some(data) = frame.data_ref() else {
            continue;
        };
        buffer.extend_from_slice(data);

        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            match parse_event_line(line) {
                Ok(Some(event)) => {
                    log::trace!("Received event: {:?}", event);
                    if tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(err) => log::warn!(
                    "failed to decode event `{}`: {}",
                    String::from_utf8_lossy(line),
                    err
                ),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    use super::*;

    /// Serves one canned response per accepted connection and reports the request lines seen.
    fn serve(
        listener: UnixListener,
        responses: Vec<String>,
    ) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let mut request_lines = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let request = String::from_utf8_lossy(&request).to_string();
                request_lines.push(request.lines().next().unwrap_or_default().to_owned());
                // The reachability probe of `subscribe` hangs up without sending a request.
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
            request_lines
        })
    }

    fn ok_json(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    }

    #[tokio::test]
    async fn test_list_and_inspect() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let server = serve(
            listener,
            vec![
                ok_json(r#"[{"Id":"abc","State":"running"},{"Id":"def","State":"exited"}]"#),
                ok_json(
                    r#"{"Id":"abc","State":{"Running":true,"Pid":7,"StartedAt":"T1"},"HostConfig":{"NetworkMode":"default"},"Config":{"Hostname":"abc","Labels":{}}}"#,
                ),
                "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                    .to_owned(),
            ],
        );

        let client = DockerClient::new(&socket);
        let containers = client.list_containers().await.unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[1].id.as_str(), "def");

        let inspect = client
            .inspect(&ContainerID::new("abc").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inspect.state.pid, 7);
        assert_eq!(inspect.state.started_at, "T1");

        let missing = client
            .inspect(&ContainerID::new("gone").unwrap())
            .await
            .unwrap();
        assert!(missing.is_none());

        let request_lines = server.await.unwrap();
        assert_eq!(request_lines[0], "GET /containers/json?all=1 HTTP/1.1");
        assert_eq!(request_lines[1], "GET /containers/abc/json HTTP/1.1");
        assert_eq!(request_lines[2], "GET /containers/gone/json HTTP/1.1");
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let body = r#"{"message":"boom"}"#;
        let _server = serve(
            listener,
            vec![format!(
                "HTTP/1.1 500 Internal Server Error\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )],
        );

        let err = DockerClient::new(&socket)
            .inspect(&ContainerID::new("abc").unwrap())
            .await
            .unwrap_err();
        match err {
            Error::Status { status, body, .. } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert!(body.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_subscribe_forwards_events() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let events = concat!(
            r#"{"status":"start","id":"abc","from":"nginx","Type":"container","Action":"start"}"#,
            "\n",
            r#"{"Type":"network","Action":"connect","Actor":{"ID":"n1"}}"#,
            "\n",
            r#"{"status":"die","id":"abc","from":"nginx","Type":"container","Action":"die"}"#,
            "\n",
        );
        // The first connection is the reachability probe of `subscribe`.
        let _server = serve(
            listener,
            vec![
                "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_owned(),
                format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                    events.len(),
                    events
                ),
            ],
        );

        let (tx, mut rx) = mpsc::channel(8);
        let subscription = DockerClient::new(&socket).subscribe(tx).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.status, "start");
        assert_eq!(first.id.as_str(), "abc");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.status, "die");

        subscription.stop();
    }
}
