// src/pipeline/link.rs

//! The byte buffer between two linked stages.
//!
//! One buffer per link, owned by the multiplexer, which is also its only
//! writer. Bytes drained from the upstream output are appended at the write
//! cursor and flushed to the downstream input from the read cursor.
//!
//! Invariants: `read_pos <= write_pos <= capacity` and
//! `free() + used() == capacity()`.

/// Default link capacity: 256 KiB.
pub const LINK_CAPACITY: usize = 4096 * 64;

#[derive(Debug)]
pub struct LinkBuffer {
    buf: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
    ready: bool,
    upstream_closed: bool,
    downstream_closed: bool,
    bytes_in: u64,
    bytes_out: u64,
    bytes_dropped: u64,
}

impl Default for LinkBuffer {
    fn default() -> Self {
        Self::with_capacity(LINK_CAPACITY)
    }
}

impl LinkBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "link capacity must be non-zero");
        Self {
            buf: vec![0; capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
            ready: false,
            upstream_closed: false,
            downstream_closed: false,
            bytes_in: 0,
            bytes_out: 0,
            bytes_dropped: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn used(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.used()
    }

    pub fn is_empty(&self) -> bool {
        self.used() == 0
    }

    /// Copy as much of `data` as fits; returns the number of bytes taken.
    ///
    /// Once the downstream end is closed, everything is accepted and
    /// discarded so the upstream can still be drained.
    pub fn push(&mut self, data: &[u8]) -> usize {
        if self.downstream_closed {
            self.bytes_dropped += data.len() as u64;
            return data.len();
        }
        let n = data.len().min(self.free());
        if n == 0 {
            return 0;
        }
        if self.capacity() - self.write_pos < n {
            self.compact();
        }
        self.buf[self.write_pos..self.write_pos + n].copy_from_slice(&data[..n]);
        self.write_pos += n;
        self.bytes_in += n as u64;
        n
    }

    /// Bytes waiting to be written downstream.
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.read_pos..self.write_pos]
    }

    /// Mark `n` pending bytes as written.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.used());
        self.read_pos += n;
        self.bytes_out += n as u64;
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        }
    }

    fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        self.buf.copy_within(self.read_pos..self.write_pos, 0);
        self.write_pos -= self.read_pos;
        self.read_pos = 0;
    }

    /// A link is ready once both endpoints are registered for readiness.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub(crate) fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn upstream_closed(&self) -> bool {
        self.upstream_closed
    }

    pub(crate) fn close_upstream(&mut self) {
        self.upstream_closed = true;
    }

    pub fn downstream_closed(&self) -> bool {
        self.downstream_closed
    }

    /// The downstream input went away; pending bytes are discarded.
    pub(crate) fn close_downstream(&mut self) {
        self.downstream_closed = true;
        self.bytes_dropped += self.used() as u64;
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// The downstream input should be closed: upstream hit end-of-stream and
    /// everything it produced has been flushed.
    pub fn is_drained(&self) -> bool {
        self.upstream_closed && self.is_empty()
    }

    /// Total bytes accepted from upstream.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Total bytes flushed downstream.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Bytes discarded because the downstream end closed early.
    pub fn bytes_dropped(&self) -> u64 {
        self.bytes_dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_consume_keep_cursors_consistent() {
        let mut link = LinkBuffer::with_capacity(8);
        assert_eq!(link.push(b"hello"), 5);
        assert_eq!(link.free() + link.used(), link.capacity());
        assert_eq!(link.pending(), b"hello");
        link.consume(2);
        assert_eq!(link.pending(), b"llo");
        // Only 5 bytes free, so the tail is refused and compaction kicks in.
        assert_eq!(link.push(b"world!"), 5);
        assert_eq!(link.pending(), b"lloworld");
        assert_eq!(link.free(), 0);
        link.consume(8);
        assert!(link.is_empty());
        assert_eq!(link.bytes_in(), 10);
        assert_eq!(link.bytes_out(), 10);
    }

    #[test]
    fn closed_downstream_discards() {
        let mut link = LinkBuffer::with_capacity(4);
        link.push(b"ab");
        link.close_downstream();
        assert_eq!(link.push(b"cdefgh"), 6);
        assert!(link.is_empty());
        assert_eq!(link.bytes_dropped(), 8);
    }

    #[test]
    fn drained_only_after_upstream_closes_and_buffer_empties() {
        let mut link = LinkBuffer::with_capacity(4);
        link.push(b"x");
        link.close_upstream();
        assert!(!link.is_drained());
        link.consume(1);
        assert!(link.is_drained());
    }
}
