//! pkt-line framing for the smart HTTP ref advertisement.
//!
//! A packet is a 4-digit hex length (which counts itself) followed by the
//! payload; `0000` is the flush packet.

use bytes::{BufMut, Bytes, BytesMut};

/// The flush packet.
pub const FLUSH_PKT: &[u8] = b"0000";

/// Largest payload a single packet may carry.
pub const MAX_PKT_PAYLOAD: usize = 65516;

/// Accumulates framed packets into one response body.
#[derive(Debug, Default)]
pub struct PktLineWriter {
    buf: BytesMut,
}

impl PktLineWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames `payload` as a single data packet.
    ///
    /// Payloads over [`MAX_PKT_PAYLOAD`] are split across packets.
    pub fn data(&mut self, payload: &[u8]) {
        for chunk in payload.chunks(MAX_PKT_PAYLOAD) {
            self.buf.put_slice(format!("{:04x}", chunk.len() + 4).as_bytes());
            self.buf.put_slice(chunk);
        }
    }

    /// Frames a text line, terminating it with `\n` when needed.
    pub fn text(&mut self, line: &str) {
        if line.ends_with('\n') {
            self.data(line.as_bytes());
        } else {
            let mut payload = Vec::with_capacity(line.len() + 1);
            payload.extend_from_slice(line.as_bytes());
            payload.push(b'\n');
            self.data(&payload);
        }
    }

    pub fn flush(&mut self) {
        self.buf.put_slice(FLUSH_PKT);
    }

    /// Appends output that `git` already framed.
    pub fn append_framed(&mut self, framed: &[u8]) {
        self.buf.put_slice(framed);
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// The `# service=<name>` preamble that v0/v1 smart HTTP clients expect
/// before the ref advertisement.
pub fn service_announcement(service_name: &str) -> Bytes {
    let mut writer = PktLineWriter::new();
    writer.text(&format!("# service={service_name}"));
    writer.flush();
    writer.finish()
}
