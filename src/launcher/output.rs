//! Output pumps: forward a child's stdout/stderr lines as session events.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::debug;

use crate::channel::codec::LineCodec;
use crate::events::EventSink;
use crate::models::event::EventKind;
use crate::AppError;

/// Which standard stream a pump reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl OutputStream {
    fn event(self, line: String) -> EventKind {
        match self {
            Self::Stdout => EventKind::Stdout { line },
            Self::Stderr => EventKind::Stderr { line },
        }
    }
}

/// Spawn a task that emits one event per line until the stream closes.
///
/// Invalid UTF-8 is replaced with `U+FFFD`. Oversized lines are skipped;
/// the pump resumes at the next newline.
#[must_use]
pub fn spawn_output_pump<R>(
    reader: R,
    stream: OutputStream,
    session_id: String,
    sink: EventSink,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = FramedRead::new(reader, LineCodec::new());
        // FramedRead yields a single `None` after a decode error, then resumes.
        let mut after_error = false;
        loop {
            match lines.next().await {
                Some(Ok(line)) => {
                    sink.emit(&session_id, stream.event(line));
                }
                Some(Err(AppError::Protocol(msg))) => {
                    debug!(session_id, ?stream, %msg, "skipping oversized output line");
                    after_error = true;
                }
                Some(Err(err)) => {
                    debug!(session_id, ?stream, %err, "output stream closed with error");
                    break;
                }
                None if after_error => after_error = false,
                None => break,
            }
        }
    })
}
