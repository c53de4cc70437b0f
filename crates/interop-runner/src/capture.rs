//! Bounded capture of client output.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Longest piece read from a client stream in one go. Lines longer than this
/// are stored as several pieces.
pub const MAX_READ: u64 = 8 * 1024;

/// Output buffer with a hard byte limit.
///
/// Once full, further bytes are dropped and `truncated` is set; readers keep
/// draining so the client never blocks on a full pipe.
#[derive(Debug)]
pub struct OutputBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append raw client bytes, keeping at most `limit` in total.
    pub fn push(&mut self, bytes: impl AsRef<[u8]>) {
        let bytes = bytes.as_ref();
        let remaining = self.limit.saturating_sub(self.data.len());
        if bytes.len() <= remaining {
            self.data.extend_from_slice(bytes);
            return;
        }
        self.data.extend_from_slice(&bytes[..remaining]);
        self.truncated = true;
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Take the captured text, leaving the buffer empty.
    ///
    /// A multi-byte character split by the limit is dropped whole; any other
    /// invalid UTF-8 is replaced.
    pub fn take(&mut self) -> (String, bool) {
        let mut data = std::mem::take(&mut self.data);
        if self.truncated {
            if let Err(e) = std::str::from_utf8(&data) {
                if e.error_len().is_none() {
                    data.truncate(e.valid_up_to());
                }
            }
        }
        let text = match String::from_utf8(data) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        (text, self.truncated)
    }
}

/// Drain `reader` into `buffer` until EOF.
///
/// Reads stop at a newline or after [`MAX_READ`] bytes, so memory held per
/// stream stays bounded no matter what the client writes.
pub fn spawn_drain<R>(reader: R, buffer: Arc<Mutex<OutputBuffer>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut piece = Vec::with_capacity(MAX_READ as usize);
        loop {
            piece.clear();
            let mut limited = (&mut reader).take(MAX_READ);
            match limited.read_until(b'\n', &mut piece).await {
                Ok(0) => break,
                Ok(_) => buffer.lock().await.push(&piece),
                Err(e) => {
                    debug!(error = %e, "client output stream closed with error");
                    break;
                }
            }
        }
    })
}
