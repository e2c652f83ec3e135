//! Test doubles shared by the connection and server tests.

use crate::conn::Conn;
use crate::handler::{Event, Handler};
use crate::protocols::LengthPrefixed;
use crate::stop::StopMode;
use crate::{lock, Protocol};
use bytes::Bytes;
use std::io;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

/// Encode one length-prefixed frame.
pub(crate) fn frame(payload: &[u8]) -> Vec<u8> {
    LengthPrefixed::new()
        .pack(&Bytes::copy_from_slice(payload))
        .unwrap()
        .to_vec()
}

/// Handler that records every event as a short string.
///
/// Events are also pushed to a channel so tests can wait for them.
pub(crate) struct Recorder {
    events: Mutex<Vec<String>>,
    notify: mpsc::UnboundedSender<String>,
    greeting: Vec<Bytes>,
    stop_after_greeting: Option<StopMode>,
    echo: bool,
}

impl Recorder {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (notify, rx) = mpsc::unbounded_channel();
        let recorder = Self {
            events: Mutex::new(Vec::new()),
            notify,
            greeting: Vec::new(),
            stop_after_greeting: None,
            echo: false,
        };
        (recorder, rx)
    }

    /// Packets queued as soon as a connection is established.
    pub(crate) fn greet(mut self, packets: &[&str]) -> Self {
        self.greeting = packets
            .iter()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
            .collect();
        self
    }

    /// Stop the connection right after queueing the greeting.
    pub(crate) fn then_stop(mut self, mode: StopMode) -> Self {
        self.stop_after_greeting = Some(mode);
        self
    }

    /// Send every received packet back.
    pub(crate) fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    pub(crate) fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }

    pub(crate) fn count(&self, event: &str) -> usize {
        lock(&self.events).iter().filter(|e| *e == event).count()
    }

    pub(crate) fn count_prefix(&self, prefix: &str) -> usize {
        lock(&self.events)
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    fn record(&self, event: String) {
        lock(&self.events).push(event.clone());
        let _ = self.notify.send(event);
    }
}

impl Handler<LengthPrefixed> for Recorder {
    fn on_event(&self, conn: &Conn<LengthPrefixed>, event: Event<Bytes>) {
        match event {
            Event::Connected => {
                self.record("connected".to_string());
                for packet in &self.greeting {
                    conn.send(packet.clone()).unwrap();
                }
                if let Some(mode) = self.stop_after_greeting {
                    conn.stop(mode);
                }
            }
            Event::Received(packet) => {
                self.record(format!("recv:{}", String::from_utf8_lossy(&packet)));
                if self.echo {
                    let _ = conn.send(packet);
                }
            }
            Event::Sent(packet) => {
                self.record(format!("sent:{}", String::from_utf8_lossy(&packet)));
            }
            Event::Closed(None) => self.record("closed".to_string()),
            Event::Closed(Some(e)) => self.record(format!("closed:{e}")),
        }
    }
}

/// Recorder with no scripted behavior.
pub(crate) fn recorder() -> (std::sync::Arc<Recorder>, mpsc::UnboundedReceiver<String>) {
    let (recorder, rx) = Recorder::new();
    (std::sync::Arc::new(recorder), rx)
}

/// Wait until `event` shows up on the recorder channel.
pub(crate) async fn wait_for(events: &mut mpsc::UnboundedReceiver<String>, event: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(seen) = events.recv().await {
            if seen == event {
                return;
            }
        }
        panic!("event channel closed before '{event}'");
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for '{event}'"));
}

/// Stream whose reads never complete and whose writes always fail.
pub(crate) struct BrokenPipe;

impl AsyncRead for BrokenPipe {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for BrokenPipe {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Stream where neither reads nor writes ever make progress.
pub(crate) struct Stalled;

impl AsyncRead for Stalled {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for Stalled {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Pending
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}
