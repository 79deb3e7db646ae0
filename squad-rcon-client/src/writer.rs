use log::{debug, error};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::engine::Engine;
use crate::packet::write_frames;

/// Encoded packets waiting to be written, and where to report the outcome.
pub(crate) struct WriteRequest {
    pub buf: Vec<u8>,
    pub done: oneshot::Sender<crate::Result<()>>,
}

/// Send side of a connection.
///
/// Every write goes through this task, so a request is written completely even if the caller
/// that queued it stops waiting halfway through. A failed write leaves the stream out of sync:
/// the reader is stopped and every pending request fails with the cause.
pub(crate) async fn write_loop<W: AsyncWrite + Unpin>(
    mut write: W,
    mut requests: mpsc::Receiver<WriteRequest>,
    engine: Arc<Engine>,
    reader: Arc<JoinHandle<crate::Error>>,
    timeout: Duration,
) {
    while let Some(request) = requests.recv().await {
        if let Err(err) = write_frames(&mut write, &request.buf, timeout).await {
            error!("Failed to write to the connection. Stopping. {}", err);
            reader.abort();
            let failed = engine.callbacks().fail_all(err.kind(), &err.to_string());
            if failed > 0 {
                debug!("Failed {} pending requests", failed);
            }
            let _ = request.done.send(Err(err));
            break;
        }

        let _ = request.done.send(Ok(()));
    }

    // Requests still queued are dropped here, their callers see the table's failure
    requests.close();
    if let Err(err) = write.shutdown().await {
        debug!("Failed to shut down connection: {}", err);
    }
}
