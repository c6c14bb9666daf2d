//! Forgiving cursor over a packet payload
//!
//! Fixed-width reads return whatever bytes remain, so a truncated integer
//! decodes from the shorter slice. Only single-byte reads are strict: reading
//! a required byte past the end yields `None`.

/// Cursor over payload bytes following the type tag
#[derive(Debug, Clone)]
pub(crate) struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Up to `n` bytes, fewer if the payload ends first
    pub(crate) fn take(&mut self, n: usize) -> &'a [u8] {
        let start = self.pos.min(self.buf.len());
        let end = start.saturating_add(n).min(self.buf.len());
        self.pos = end;
        &self.buf[start..end]
    }

    /// Everything that is left
    pub(crate) fn rest(&mut self) -> &'a [u8] {
        self.take(usize::MAX)
    }

    pub(crate) fn skip(&mut self, n: usize) {
        self.take(n);
    }

    /// One required byte
    pub(crate) fn u8(&mut self) -> Option<u8> {
        self.take(1).first().copied()
    }

    /// Unsigned little-endian integer from up to `n` bytes
    pub(crate) fn uint_le(&mut self, n: usize) -> u64 {
        le_unsigned(self.take(n))
    }

    /// Signed little-endian integer from up to `n` bytes
    pub(crate) fn int_le(&mut self, n: usize) -> i64 {
        le_signed(self.take(n))
    }

    /// Lowercase hex of up to `n` bytes
    pub(crate) fn hex(&mut self, n: usize) -> String {
        hex::encode(self.take(n))
    }

    /// Lossy UTF-8 of up to `n` bytes
    pub(crate) fn text(&mut self, n: usize) -> String {
        lossy_text(self.take(n))
    }
}

pub(crate) fn le_unsigned(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(8)
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

pub(crate) fn le_signed(bytes: &[u8]) -> i64 {
    let bytes = &bytes[..bytes.len().min(8)];
    let Some(&last) = bytes.last() else {
        return 0;
    };
    let value = le_unsigned(bytes);
    let bits = bytes.len() * 8;
    if bits < 64 && last & 0x80 != 0 {
        (value | (u64::MAX << bits)) as i64
    } else {
        value as i64
    }
}

/// UTF-8 decode that drops invalid sequences
pub(crate) fn lossy_text(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

/// Cut `text` to `max` characters, marking the cut with `...`
pub(crate) fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_reads_are_lenient() {
        let mut reader = PayloadReader::new(&[0x01, 0x02]);
        assert_eq!(reader.uint_le(4), 0x0201);
        assert_eq!(reader.uint_le(4), 0);
        assert_eq!(reader.hex(6), "");
        assert_eq!(reader.u8(), None);
    }

    #[test]
    fn test_signed_values() {
        assert_eq!(le_signed(&(-1_234_567i32).to_le_bytes()), -1_234_567);
        assert_eq!(le_signed(&[0xFF]), -1);
        assert_eq!(le_signed(&[0xFE, 0xFF]), -2);
        assert_eq!(le_signed(&[]), 0);
    }

    #[test]
    fn test_lossy_text_drops_invalid_bytes() {
        assert_eq!(lossy_text(b"ok\xFF\xFEgo"), "okgo");
        assert_eq!(lossy_text("héllo".as_bytes()), "héllo");
    }

    #[test]
    fn test_preview_counts_characters() {
        assert_eq!(preview("short", 50), "short");
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("ééééé", 2), "éé...");
        assert_eq!(preview(&"x".repeat(50), 50), "x".repeat(50));
    }
}
