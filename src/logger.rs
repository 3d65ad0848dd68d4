use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::BspError;

pub trait Logger: Send + Sync {
    fn connected(&self, _peer: &str) {}
    fn transfer_done(&self, _id: &str, _body_bytes: usize) {}
    fn listing_done(&self, _count: usize) {}
    fn delete_sent(&self, _id: &str) {}
    fn unsolicited(&self, _byte: u8) {}
    fn fault(&self, _context: &str, _err: &BspError) {}
    fn closed(&self, _peer: &str) {}
    fn discovered(&self, _address: &str) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Append-only event log. Each line carries a timestamp, a per-logger
/// sequence number and the tag of whoever opened it:
///
/// ```text
/// [2026-10-17T09:12:03.511+00:00] #3 list LISTING count=12
/// ```
pub struct TextLogger {
    sink: Mutex<Sink>,
    tag: String,
}

struct Sink {
    file: File,
    seq: u64,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log dir: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log: {}", path.display()))?;
        Ok(Self {
            sink: Mutex::new(Sink { file, seq: 0 }),
            tag: "bsp".to_string(),
        })
    }

    /// Label every line, e.g. with the command or session that owns the log.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    fn line(&self, event: &str, fields: std::fmt::Arguments<'_>) {
        let mut sink = self.sink.lock();
        sink.seq += 1;
        let seq = sink.seq;
        let _ = writeln!(
            sink.file,
            "[{}] #{} {} {} {}",
            Utc::now().to_rfc3339(),
            seq,
            self.tag,
            event,
            fields
        );
    }
}

impl Logger for TextLogger {
    fn connected(&self, peer: &str) {
        self.line("CONNECT", format_args!("peer={}", peer));
    }
    fn transfer_done(&self, id: &str, body_bytes: usize) {
        self.line("TRANSFER", format_args!("id={} body_bytes={}", id, body_bytes));
    }
    fn listing_done(&self, count: usize) {
        self.line("LISTING", format_args!("count={}", count));
    }
    fn delete_sent(&self, id: &str) {
        self.line("DELETE", format_args!("id={}", id));
    }
    fn unsolicited(&self, byte: u8) {
        self.line("UNSOLICITED", format_args!("byte={:#04x}", byte));
    }
    fn fault(&self, context: &str, err: &BspError) {
        self.line(
            "ERROR",
            format_args!("ctx={} kind={:?} msg={}", context, err.kind(), err),
        );
    }
    fn closed(&self, peer: &str) {
        self.line("CLOSE", format_args!("peer={}", peer));
    }
    fn discovered(&self, address: &str) {
        self.line("DISCOVER", format_args!("address={}", address));
    }
}
