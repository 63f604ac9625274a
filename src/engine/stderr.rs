use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on retained stderr; older bytes are discarded first.
pub const STDERR_CAP: usize = 64 * 1024;

/// Keeps the last `cap` bytes written to it.
#[derive(Debug)]
pub struct StderrTail {
    cap: usize,
    buf: VecDeque<u8>,
    dropped: u64,
}

impl StderrTail {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            buf: VecDeque::with_capacity(cap.min(8 * 1024)),
            dropped: 0,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        let bytes = if bytes.len() > self.cap {
            self.dropped += (bytes.len() - self.cap) as u64;
            &bytes[bytes.len() - self.cap..]
        } else {
            bytes
        };

        let overflow = (self.buf.len() + bytes.len()).saturating_sub(self.cap);
        if overflow > 0 {
            self.buf.drain(..overflow);
            self.dropped += overflow as u64;
        }
        self.buf.extend(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes discarded so far to stay within the cap.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn to_string_lossy(&self) -> String {
        let (head, tail) = self.buf.as_slices();
        let mut joined = Vec::with_capacity(self.buf.len());
        joined.extend_from_slice(head);
        joined.extend_from_slice(tail);
        String::from_utf8_lossy(&joined).into_owned()
    }
}

/// Read `reader` to EOF, keeping only the tail. Read errors end the drain.
pub async fn drain<R>(mut reader: R, cap: usize) -> StderrTail
where
    R: AsyncRead + Unpin,
{
    let mut tail = StderrTail::new(cap);
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => tail.push(&chunk[..n]),
        }
    }
    tail
}
