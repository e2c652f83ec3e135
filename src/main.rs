//! xtcp: a framed TCP echo server
//!
//! Every packet a client sends is written back to it unchanged. The framing
//! is selectable:
//! - CRLF-terminated text lines
//! - 4-byte length-prefixed binary frames
//!
//! Ctrl-C stops the server with the configured shutdown mode.

use std::error::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use xtcp::config::{Config, ProtocolKind};
use xtcp::protocols::{LengthPrefixed, LineProtocol};
use xtcp::{Conn, Event, Handler, Options, Protocol, SendError, Server};

/// Sends every received packet straight back.
struct Echo;

impl<P: Protocol> Handler<P> for Echo {
    fn on_event(&self, conn: &Conn<P>, event: Event<P::Packet>) {
        if let Event::Received(packet) = event {
            match conn.send(packet) {
                Ok(()) => {}
                Err(SendError::Full(_)) => {
                    warn!(conn = %conn.id(), "Send queue full, dropping echo");
                }
                Err(SendError::Closed(_)) => {}
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        protocol = ?config.protocol,
        send_buf_len = config.send_buf_len,
        backlog = config.backlog,
        stop_mode = %config.stop_mode,
        "Starting xtcp echo server"
    );

    match config.protocol {
        ProtocolKind::Line => run(config, LineProtocol::new()).await,
        ProtocolKind::Length => run(config, LengthPrefixed::new()).await,
    }
}

async fn run<P: Protocol>(config: Config, protocol: P) -> Result<(), Box<dyn Error>> {
    let opts = Options::new(Echo, protocol)
        .with_listen(config.listen)
        .with_send_buf_len(config.send_buf_len)
        .with_read_buf_size(config.read_buf_size)
        .with_backlog(config.backlog);

    let server = Server::new(opts)?;
    let listener = server.bind().await?;

    let mut serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await })
    };

    tokio::select! {
        joined = &mut serving => {
            // The accept loop ended on its own: the listener is unusable.
            joined??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!(mode = %config.stop_mode, "Shutdown signal received");
        }
    }

    server.shutdown(config.stop_mode).await;
    serving.await??;

    info!("Server shut down");
    Ok(())
}
