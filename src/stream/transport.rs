//! Long-lived HTTP connection to the realtime endpoint.
//!
//! Each [`StreamTransport::open`] call makes exactly one outbound request and
//! returns a [`ChunkStream`] fed by a background reader task. Failures arrive
//! as a single terminal `Err` item, never mid-chunk.

use std::future::Future;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, COOKIE};
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::auth::{browser_headers, Session};
use crate::config::RealtimeOptions;

/// Production realtime event stream endpoint.
pub const REALTIME_CONNECT_URL: &str = "https://realtime.www.linkedin.com/realtime/connect";

/// Reasons a stream connection ended or could not be opened.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("connection timed out")]
    Timeout,

    #[error("session rejected by stream endpoint")]
    AuthRejected,

    #[error("stream closed")]
    Closed,
}

/// Opens stream connections bound to a session.
pub trait StreamTransport: Send + Sync + 'static {
    /// Opens one connection. `resume_from` is the last delivered event id,
    /// passed only when the backend is known to honour it.
    fn open(
        &self,
        session: &Session,
        resume_from: Option<&str>,
    ) -> impl Future<Output = Result<ChunkStream, TransportError>> + Send;
}

/// Byte chunks from one open connection.
///
/// Yields `Ok` chunks until the connection ends, then exactly one `Err` with
/// the reason, then `None`. After [`ChunkStream::close`] it yields `None`.
#[derive(Debug)]
pub struct ChunkStream {
    rx: mpsc::Receiver<Result<Bytes, TransportError>>,
    reader: Option<JoinHandle<()>>,
    finished: bool,
}

impl ChunkStream {
    /// Wraps a receiver fed by `reader`, which is aborted on close.
    pub fn new(
        rx: mpsc::Receiver<Result<Bytes, TransportError>>,
        reader: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            rx,
            reader,
            finished: false,
        }
    }

    /// Creates a stream driven directly through the returned sender.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Result<Bytes, TransportError>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx, None))
    }

    pub async fn next(&mut self) -> Option<Result<Bytes, TransportError>> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(Ok(chunk)) => Some(Ok(chunk)),
            Some(Err(err)) => {
                self.close();
                Some(Err(err))
            }
            None => {
                self.close();
                Some(Err(TransportError::Closed))
            }
        }
    }

    /// Terminates the connection. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.finished = true;
        self.rx.close();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.finished
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Stream transport over a streaming reqwest response body.
#[derive(Clone)]
pub struct HttpStreamTransport {
    http: Client,
    endpoint: String,
    chunk_buffer: usize,
}

impl HttpStreamTransport {
    pub fn new(options: &RealtimeOptions) -> Result<Self, TransportError> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .default_headers(browser_headers())
            .build()
            .map_err(|err| TransportError::ConnectionRefused(err.to_string()))?;

        Ok(Self {
            http,
            endpoint: REALTIME_CONNECT_URL.to_string(),
            chunk_buffer: options.chunk_buffer.max(1),
        })
    }

    /// Sets an explicit stream endpoint override.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.endpoint = endpoint.trim_end().to_string();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl StreamTransport for HttpStreamTransport {
    async fn open(
        &self,
        session: &Session,
        resume_from: Option<&str>,
    ) -> Result<ChunkStream, TransportError> {
        let mut request = self
            .http
            .get(&self.endpoint)
            .header(ACCEPT, "text/event-stream")
            .header(COOKIE, session.cookie_header())
            .header("csrf-token", session.anti_forgery_token());
        if let Some(event_id) = resume_from {
            request = request.header("last-event-id", event_id);
        }

        let response = request.send().await.map_err(classify_request_error)?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(TransportError::AuthRejected)
            }
            status => {
                return Err(TransportError::ConnectionRefused(format!(
                    "stream endpoint returned {status}"
                )))
            }
        }

        debug!(event = "stream_opened", resumed = resume_from.is_some());
        let (tx, rx) = mpsc::channel(self.chunk_buffer);
        let reader = tokio::spawn(forward_body(response, tx));
        Ok(ChunkStream::new(rx, Some(reader)))
    }
}

async fn forward_body(response: Response, tx: mpsc::Sender<Result<Bytes, TransportError>>) {
    let mut body = response.bytes_stream();
    while let Some(item) = body.next().await {
        match item {
            Ok(chunk) => {
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                let reason = if err.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Closed
                };
                debug!(event = "stream_body_error", error = %err);
                let _ = tx.send(Err(reason)).await;
                return;
            }
        }
    }
    let _ = tx.send(Err(TransportError::Closed)).await;
}

fn classify_request_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::ConnectionRefused(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::{ChunkStream, HttpStreamTransport, TransportError, REALTIME_CONNECT_URL};
    use crate::config::RealtimeOptions;

    #[test]
    fn http_transport_uses_production_endpoint_by_default() {
        let transport = HttpStreamTransport::new(&RealtimeOptions::default()).expect("client");
        assert_eq!(transport.endpoint(), REALTIME_CONNECT_URL);
    }

    #[test]
    fn http_transport_endpoint_override_trims_whitespace() {
        let transport = HttpStreamTransport::new(&RealtimeOptions::default())
            .expect("client")
            .with_endpoint("http://127.0.0.1:9/realtime/connect   \n");
        assert_eq!(transport.endpoint(), "http://127.0.0.1:9/realtime/connect");
    }

    #[tokio::test]
    async fn chunk_stream_ends_with_single_reason() {
        let (tx, mut stream) = ChunkStream::channel(4);
        tx.send(Ok(Bytes::from_static(b"data: 1\n\n")))
            .await
            .expect("send");
        drop(tx);

        assert_eq!(
            stream.next().await,
            Some(Ok(Bytes::from_static(b"data: 1\n\n")))
        );
        assert_eq!(stream.next().await, Some(Err(TransportError::Closed)));
        assert_eq!(stream.next().await, None);
        assert!(stream.is_closed());
    }

    #[tokio::test]
    async fn chunk_stream_close_is_idempotent() {
        let (tx, mut stream) = ChunkStream::channel(4);
        stream.close();
        stream.close();
        assert!(tx.send(Ok(Bytes::new())).await.is_err());
        assert_eq!(stream.next().await, None);
    }
}
