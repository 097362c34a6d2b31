//! Line framing for the worker's output stream
//!
//! Raw chunks arrive in whatever sizes the pipe delivers. `FrameReader`
//! buffers them and hands back complete, trimmed, non-empty lines. Bytes are
//! buffered rather than text so a multi-byte character split across two
//! reads is reassembled before decoding.

use thiserror::Error;

use crate::config::DEFAULT_MAX_LINE_BYTES;

/// Framing failures. Never fatal to the stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// A line grew past the configured cap and was discarded
    #[error("line exceeded {limit} bytes ({observed} buffered) and was discarded")]
    LineTooLong { limit: usize, observed: usize },
}

/// Accumulates raw bytes and splits them on `\n`.
#[derive(Debug)]
pub struct FrameReader {
    buffer: Vec<u8>,
    /// Offset up to which `buffer` is known to contain no terminator
    scanned: usize,
    max_line_bytes: usize,
    /// Dropping the remainder of an oversized line until its terminator
    discarding: bool,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    /// Create a reader with the default line cap
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    /// Create a reader with a custom line cap
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_line_bytes: max_line_bytes.max(1),
            discarding: false,
        }
    }

    /// Append a chunk and iterate over the lines it completes.
    ///
    /// The iterator is lazy: lines not pulled stay buffered and come out
    /// of the next `feed` call.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(chunk);
        Frames { reader: self }
    }

    /// Drop everything buffered
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.discarding = false;
    }

    /// Number of bytes waiting for a terminator
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn next_frame(&mut self) -> Option<Result<String, FrameError>> {
        loop {
            let found = self.buffer[self.scanned..]
                .iter()
                .position(|byte| *byte == b'\n')
                .map(|offset| self.scanned + offset);

            let Some(end) = found else {
                self.scanned = self.buffer.len();
                if self.discarding {
                    self.buffer.clear();
                    self.scanned = 0;
                } else if self.buffer.len() > self.max_line_bytes {
                    let observed = self.buffer.len();
                    self.buffer.clear();
                    self.scanned = 0;
                    self.discarding = true;
                    return Some(Err(FrameError::LineTooLong {
                        limit: self.max_line_bytes,
                        observed,
                    }));
                }
                return None;
            };

            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            self.scanned = 0;

            if self.discarding {
                self.discarding = false;
                continue;
            }

            let content = &raw[..raw.len() - 1];
            if content.len() > self.max_line_bytes {
                return Some(Err(FrameError::LineTooLong {
                    limit: self.max_line_bytes,
                    observed: content.len(),
                }));
            }

            let text = String::from_utf8_lossy(content);
            let line = text.trim();
            if line.is_empty() {
                continue;
            }
            return Some(Ok(line.to_string()));
        }
    }
}

/// Lines completed by one `feed` call
pub struct Frames<'a> {
    reader: &'a mut FrameReader,
}

impl Iterator for Frames<'_> {
    type Item = Result<String, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_ok(reader: &mut FrameReader, chunk: &[u8]) -> Vec<String> {
        reader
            .feed(chunk)
            .map(|frame| frame.expect("unexpected frame error"))
            .collect()
    }

    #[test]
    fn test_single_chunk_multiple_lines() {
        let mut reader = FrameReader::new();
        let lines = collect_ok(&mut reader, b"{\"type\":\"ready\"}\n{\"type\":\"pong\"}\n");
        assert_eq!(lines, vec!["{\"type\":\"ready\"}", "{\"type\":\"pong\"}"]);
        assert_eq!(reader.buffered_len(), 0);
    }

    #[test]
    fn test_partial_line_is_held_back() {
        let mut reader = FrameReader::new();
        assert!(collect_ok(&mut reader, b"{\"type\":").is_empty());
        assert_eq!(reader.buffered_len(), 8);

        let lines = collect_ok(&mut reader, b"\"pong\"}\n{\"ty");
        assert_eq!(lines, vec!["{\"type\":\"pong\"}"]);
        assert_eq!(reader.buffered_len(), 4);
    }

    #[test]
    fn test_blank_lines_and_crlf_are_dropped() {
        let mut reader = FrameReader::new();
        let lines = collect_ok(&mut reader, b"\n  \r\nPING\r\n\n");
        assert_eq!(lines, vec!["PING"]);
    }

    #[test]
    fn test_every_split_point_yields_the_same_lines() {
        let stream = "{\"type\":\"ready\",\"message\":\"héllo\"}\n{\"type\":\"log\",\"level\":\"info\",\"message\":\"✓ done\"}\n{\"type\":\"pong\"}\n";
        let bytes = stream.as_bytes();
        let expected: Vec<String> = stream.lines().map(str::to_string).collect();

        for split in 0..=bytes.len() {
            let mut reader = FrameReader::new();
            let mut lines = collect_ok(&mut reader, &bytes[..split]);
            lines.extend(collect_ok(&mut reader, &bytes[split..]));
            assert_eq!(lines, expected, "split at byte {split}");

            let rebuilt: String = lines.iter().map(|line| format!("{line}\n")).collect();
            assert_eq!(rebuilt, stream);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let stream = b"{\"a\":1}\n{\"b\":2}\n";
        let mut reader = FrameReader::new();
        let mut lines = Vec::new();
        for byte in stream.iter() {
            lines.extend(collect_ok(&mut reader, std::slice::from_ref(byte)));
        }
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_lazy_iteration_keeps_unpulled_lines() {
        let mut reader = FrameReader::new();
        let first = reader.feed(b"one\ntwo\nthree\n").next();
        assert_eq!(first, Some(Ok("one".to_string())));

        let rest = collect_ok(&mut reader, b"");
        assert_eq!(rest, vec!["two", "three"]);
    }

    #[test]
    fn test_oversized_unterminated_line_is_discarded() {
        let mut reader = FrameReader::with_max_line_bytes(8);

        let frames: Vec<_> = reader.feed(b"0123456789").collect();
        assert_eq!(
            frames,
            vec![Err(FrameError::LineTooLong {
                limit: 8,
                observed: 10
            })]
        );
        assert_eq!(reader.buffered_len(), 0);

        // Tail of the oversized line is swallowed, the next line survives
        let lines = collect_ok(&mut reader, b"abcdef\nok\n");
        assert_eq!(lines, vec!["ok"]);
    }

    #[test]
    fn test_oversized_terminated_line_is_reported() {
        let mut reader = FrameReader::with_max_line_bytes(4);
        let frames: Vec<_> = reader.feed(b"abcdefgh\nabc\n").collect();
        assert_eq!(
            frames,
            vec![
                Err(FrameError::LineTooLong {
                    limit: 4,
                    observed: 8
                }),
                Ok("abc".to_string()),
            ]
        );
    }

    #[test]
    fn test_reset_discards_partial_line() {
        let mut reader = FrameReader::new();
        assert!(collect_ok(&mut reader, b"{\"partial\":").is_empty());
        reader.reset();
        assert_eq!(reader.buffered_len(), 0);
        assert_eq!(collect_ok(&mut reader, b"{}\n"), vec!["{}"]);
    }
}
