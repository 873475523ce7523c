use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Default per-stream retention cap.
pub const DEFAULT_STREAM_CAP: usize = 10 * 1024 * 1024;

/// Bounded capture ring for one child stream.
///
/// The total-bytes counter keeps counting after the retention cap is hit;
/// the watchdog reads the counter, so a chatty provider that blows past the
/// cap still registers as making progress. Retention keeps the most recent
/// bytes (agents put their verdict at the end of the transcript); a marker
/// notes how much of the head was dropped.
pub struct OutputBuffer {
    data: Mutex<Vec<u8>>,
    total: AtomicU64,
    cap: usize,
}

impl OutputBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            data: Mutex::new(Vec::new()),
            total: AtomicU64::new(0),
            cap,
        }
    }

    /// Append a chunk. Never blocks on anything but the short internal lock.
    pub fn push(&self, chunk: &[u8]) {
        self.total.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.extend_from_slice(chunk);
        if data.len() > self.cap {
            let excess = data.len() - self.cap;
            data.drain(..excess);
        }
    }

    /// Monotone count of every byte the child produced on this stream.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Retained bytes, with a truncation marker when the cap was exceeded.
    pub fn contents(&self) -> Vec<u8> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        let total = self.total();
        if total <= data.len() as u64 {
            return data.clone();
        }
        let dropped = total - data.len() as u64;
        let mut out = format!("[output truncated: first {dropped} of {total} bytes dropped]\n")
            .into_bytes();
        out.extend_from_slice(&data);
        out
    }

    /// Retained bytes as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}
