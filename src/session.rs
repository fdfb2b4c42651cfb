//! Remote-mode session: sequences requests and responses over an
//! already-established stream.
//!
//! The send path and the receive path run as independent loops; the only
//! synchronization between them is the atomic "last accepted timestamp"
//! high-water mark used for staleness rejection. No retries are performed —
//! a lost request just shows up as one extra miss tick in the track states.

use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::error::{FrameError, ProtocolError, SessionError};
use crate::frame::{ColorFrame, MatchResult, TrackerQuery, BYTES_PER_PIXEL_BGRA};
use crate::protocol::{ClientCodec, HueRange, RequestFrame, RequestMessage};

/// What the receive loop hands to the tracking pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A fresh (non-stale) response, mapped back to tracker ids.
    Results {
        results: Vec<MatchResult>,
        timestamp_millis: i64,
    },
    /// Malformed traffic; the connection is closed, nothing is recovered.
    ProtocolFailure(String),
    /// The peer closed the stream. Active tracks decay through hysteresis.
    Disconnected,
}

/// Milliseconds since the UNIX epoch, the timestamp unit of the wire format.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Accept a response only if its timestamp is strictly newer than every
/// previously accepted one. Out-of-order and duplicate deliveries lose.
fn accept_timestamp(last_accepted: &AtomicI64, timestamp: i64) -> bool {
    last_accepted.fetch_max(timestamp, Ordering::SeqCst) < timestamp
}

pub struct Session {
    sink: Pin<Box<dyn Sink<RequestMessage, Error = ProtocolError> + Send>>,
    events: mpsc::Receiver<SessionEvent>,
    reader: JoinHandle<()>,
    last_accepted: Arc<AtomicI64>,
    pending: Arc<Mutex<Vec<u32>>>,
}

impl Session {
    pub async fn connect(addr: &str) -> Result<Self, SessionError> {
        let tcp = TcpStream::connect(addr).await.map_err(ProtocolError::Io)?;
        tcp.set_nodelay(true).map_err(ProtocolError::Io)?;
        Ok(Self::new(tcp))
    }

    /// Wrap an established ordered reliable byte stream.
    pub fn new<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let framed = Framed::new(io, ClientCodec);
        let (sink, mut stream) = framed.split::<RequestMessage>();

        let last_accepted = Arc::new(AtomicI64::new(i64::MIN));
        let pending: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let (tx, events) = mpsc::channel(8);

        let reader_last = Arc::clone(&last_accepted);
        let reader_pending = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(resp)) => {
                        if !accept_timestamp(&reader_last, resp.timestamp_millis) {
                            // Expected under network reordering, not an error.
                            continue;
                        }
                        let ids = reader_pending.lock().unwrap().clone();
                        if ids.len() != resp.results.len() {
                            let err = ProtocolError::ResultCountMismatch {
                                expected: ids.len(),
                                got: resp.results.len(),
                            };
                            let _ = tx.send(SessionEvent::ProtocolFailure(err.to_string())).await;
                            break;
                        }
                        let results = ids
                            .iter()
                            .zip(resp.results.iter())
                            .map(|(id, pixel)| MatchResult {
                                id: *id,
                                pixel: *pixel,
                            })
                            .collect();
                        let event = SessionEvent::Results {
                            results,
                            timestamp_millis: resp.timestamp_millis,
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(SessionEvent::ProtocolFailure(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = tx.send(SessionEvent::Disconnected).await;
                        break;
                    }
                }
            }
        });

        Self {
            sink: Box::pin(sink),
            events,
            reader,
            last_accepted,
            pending,
        }
    }

    /// Send one RequestFrame for one captured frame. Transmission does not
    /// wait for the response to the previous frame.
    pub async fn send_frame(
        &mut self,
        queries: &[TrackerQuery],
        frame: &ColorFrame,
        timestamp_millis: i64,
    ) -> Result<(), SessionError> {
        if frame.bytes_per_pixel() != BYTES_PER_PIXEL_BGRA {
            return Err(SessionError::Protocol(ProtocolError::Malformed(
                FrameError::UnsupportedStride(frame.bytes_per_pixel()),
            )));
        }

        let request = RequestFrame {
            queries: queries.iter().map(HueRange::from).collect(),
            timestamp_millis,
            frame_width: frame.width() as i32,
            payload: frame.data().to_vec(),
        };
        // Responses are keyed by index; remember which tracker each slot maps to.
        *self.pending.lock().unwrap() = queries.iter().map(|q| q.id).collect();

        self.sink
            .send(RequestMessage::Frame(request))
            .await
            .map_err(SessionError::Protocol)
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// High-water mark of accepted response timestamps.
    pub fn last_accepted_millis(&self) -> Option<i64> {
        let v = self.last_accepted.load(Ordering::SeqCst);
        (v != i64::MIN).then_some(v)
    }

    /// Orderly shutdown: send the end-of-session sentinel, then abandon the
    /// in-flight read. Responses arriving after this point are discarded.
    pub async fn shutdown(mut self) -> Result<(), SessionError> {
        self.sink
            .send(RequestMessage::EndOfSession)
            .await
            .map_err(SessionError::Protocol)?;
        let _ = self.sink.close().await;
        self.reader.abort();
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
