//! Build log fan-out.
//!
//! A single writer feeds every stage's output to the caller's sink and
//! to an in-memory buffer. The buffer preserves write order; its
//! snapshot becomes the stored log object when the build terminates.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// Fan-out log writer. Clones share the same buffer and sink.
#[derive(Clone)]
pub struct LogWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
    sink: Option<Arc<Mutex<Box<dyn Write + Send>>>>,
}

impl LogWriter {
    /// A writer that only buffers (tests, log storage).
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
            sink: None,
        }
    }

    /// A writer that also streams to the given sink (the caller's
    /// stdout when run as a child process).
    pub fn with_sink(sink: Box<dyn Write + Send>) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
            sink: Some(Arc::new(Mutex::new(sink))),
        }
    }

    /// Write one line (newline appended).
    pub fn line(&self, line: &str) {
        let mut data = line.as_bytes().to_vec();
        data.push(b'\n');
        self.write_raw(&data);
    }

    /// Write raw bytes preserving order.
    pub fn write_raw(&self, data: &[u8]) {
        self.buffer.lock().unwrap().extend_from_slice(data);
        if let Some(sink) = &self.sink {
            let mut sink = sink.lock().unwrap();
            // Sink failures must not abort the build; the buffer is the
            // durable copy.
            let _ = sink.write_all(data);
            let _ = sink.flush();
        }
    }

    /// Copy of everything written so far.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buffer.lock().unwrap().clone()
    }
}

impl Default for LogWriter {
    fn default() -> Self {
        Self::new()
    }
}
