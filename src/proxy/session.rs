//! Local client sessions and line framing.

use crate::proxy::server::ProxyShared;

use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound on a single protocol line. Verbose transactions can be large.
pub(crate) const MAX_LINE_LENGTH: usize = 32 * 1024 * 1024;

/// Bookkeeping for one connected local client.
pub(crate) struct SessionHandle {
	pub outbound: mpsc::UnboundedSender<String>,
	pub interests: SessionInterests,
}

/// Which server pushes a local client asked to receive.
#[derive(Debug, Default)]
pub(crate) struct SessionInterests {
	pub headers: bool,
	pub script_hashes: HashSet<String>,
}

/// Serve one local client until it disconnects or the proxy stops.
pub(crate) async fn serve_session(shared: Arc<ProxyShared>, session_id: u64, stream: TcpStream) {
	let (read_half, write_half) = stream.into_split();
	let (outbound, outbound_rx) = mpsc::unbounded_channel();
	shared.open_session(
		session_id,
		SessionHandle {
			outbound,
			interests: SessionInterests::default(),
		},
	);

	let writer = tokio::spawn(write_lines(
		write_half,
		outbound_rx,
		shared.shutdown_token(),
	));

	let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
	let shutdown = shared.shutdown_token();
	loop {
		tokio::select! {
			_ = shutdown.cancelled() => break,
			next = lines.next() => match next {
				Some(Ok(line)) => {
					if line.trim().is_empty() {
						continue;
					}
					shared.handle_local_line(session_id, &line).await;
				}
				Some(Err(e)) => {
					warn!("Local session {} read failed: {}", session_id, e);
					break;
				}
				None => break,
			}
		}
	}

	shared.close_session(session_id);
	let _ = writer.await;
	debug!("Local session {} closed", session_id);
}

/// Drain `lines` into `writer`, one protocol line each, until the channel closes or the
/// token is cancelled.
pub(crate) async fn write_lines<W>(
	writer: W,
	mut lines: mpsc::UnboundedReceiver<String>,
	shutdown: CancellationToken,
) where
	W: AsyncWrite + Unpin,
{
	let mut sink = FramedWrite::new(writer, LinesCodec::new());
	loop {
		tokio::select! {
			_ = shutdown.cancelled() => break,
			next = lines.recv() => match next {
				Some(line) => {
					if let Err(e) = sink.send(line).await {
						debug!("Write failed, closing stream: {}", e);
						break;
					}
				}
				None => break,
			}
		}
	}
	let _ = SinkExt::<String>::close(&mut sink).await;
}
