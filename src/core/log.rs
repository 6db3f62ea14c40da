//! Logging setup and a line-oriented writer that forwards into `tracing`.

use std::io::{self, Write};
use tracing::Span;

/// Initialize the global subscriber. `RUST_LOG` wins over `verbose`.
pub fn init(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose >= 2)
        .with_line_number(verbose >= 3)
        .try_init();
}

/// Progress sink: each complete line becomes an `info!` event in `span`.
pub struct LogWriter {
    span: Span,
    buf: Vec<u8>,
}

impl LogWriter {
    pub fn new(span: Span) -> Self {
        Self {
            span,
            buf: Vec::new(),
        }
    }

    fn emit(&mut self, end: usize) {
        let line: Vec<u8> = self.buf.drain(..=end).collect();
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\n', '\r']);
        if !text.is_empty() {
            tracing::info!(parent: &self.span, "{}", text);
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n' || *b == b'\r') {
            self.emit(pos);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            let end = self.buf.len() - 1;
            self.emit(end);
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_writer_splits_lines() {
        let mut w = LogWriter::new(Span::none());
        w.write_all(b"first\nsec").unwrap();
        assert_eq!(w.buf, b"sec");
        w.write_all(b"ond\r").unwrap();
        assert!(w.buf.is_empty());
    }

    #[test]
    fn test_log_writer_flush_drains_partial_line() {
        let mut w = LogWriter::new(Span::none());
        w.write_all(b"partial").unwrap();
        w.flush().unwrap();
        assert!(w.buf.is_empty());
    }

    #[test]
    fn test_init_is_idempotent() {
        init(0);
        init(2);
    }
}
