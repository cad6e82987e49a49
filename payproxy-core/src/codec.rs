//! Newline framing for one direction of a relayed byte stream.
//!
//! The proxy forwards raw chunks untouched; the decoder only observes
//! them. Bytes are buffered as-is so a UTF-8 sequence split across two
//! reads is reassembled before the line is decoded.

use crate::{Error, Result};

/// Longest line accepted from either peer, excluding the newline
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Splits an ordered sequence of chunks into complete lines
#[derive(Debug)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    max_frame_length: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_frame_length(MAX_FRAME_LENGTH)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self { pending: Vec::new(), max_frame_length }
    }

    /// Append a chunk and return every line it completed, in order.
    ///
    /// The trailing partial line stays buffered for the next call. Blank
    /// lines are dropped. A line longer than the limit, complete or not,
    /// is a framing error.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            self.check_length(self.pending.len())?;
            return Ok(Vec::new());
        };
        self.check_length(self.pending.len() - last_newline - 1)?;

        let remainder = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, remainder);

        let mut frames = Vec::new();
        for line in complete.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            self.check_length(line.len())?;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let text = std::str::from_utf8(line)
                .map_err(|e| Error::Framing(format!("Frame is not valid UTF-8: {}", e)))?;
            frames.push(text.to_string());
        }

        Ok(frames)
    }

    fn check_length(&self, len: usize) -> Result<()> {
        if len > self.max_frame_length {
            return Err(Error::Framing(format!(
                "Frame exceeds {} bytes",
                self.max_frame_length
            )));
        }
        Ok(())
    }

    /// Number of bytes held back waiting for a newline
    pub fn buffered_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGES: [&str; 4] = [
        r#"{"id":1,"method":"mining.subscribe","params":[]}"#,
        r#"{"id":2,"method":"mining.authorize","params":["POOLACCOUNT.t1Minerxxxx"]}"#,
        r#"{"id":null,"method":"mining.set_target","params":["1d00ffff"]}"#,
        r#"{"id":3,"result":true,"error":null}"#,
    ];

    fn stream() -> Vec<u8> {
        MESSAGES.iter().flat_map(|m| format!("{}\n", m).into_bytes()).collect()
    }

    #[test]
    fn test_single_chunk_yields_all_frames() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&stream()).unwrap();
        assert_eq!(frames, MESSAGES.to_vec());
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_arbitrary_chunk_boundaries() {
        let bytes = stream();
        for chunk_size in 1..bytes.len() {
            let mut decoder = FrameDecoder::new();
            let mut frames = Vec::new();
            for chunk in bytes.chunks(chunk_size) {
                frames.extend(decoder.feed(chunk).unwrap());
            }
            assert_eq!(frames, MESSAGES.to_vec(), "chunk size {}", chunk_size);
        }
    }

    #[test]
    fn test_partial_frame_is_held_back() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"{\"id\":1,\"res").unwrap();
        assert!(frames.is_empty());
        assert_eq!(decoder.buffered_len(), 12);

        let frames = decoder.feed(b"ult\":true}\n{\"id\"").unwrap();
        assert_eq!(frames, vec![r#"{"id":1,"result":true}"#.to_string()]);
        assert_eq!(decoder.buffered_len(), 5);
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"{\"id\":1}\r\n\n\r\n{\"id\":2}\n\n").unwrap();
        assert_eq!(frames, vec![r#"{"id":1}"#.to_string(), r#"{"id":2}"#.to_string()]);
    }

    #[test]
    fn test_split_utf8_sequence() {
        let line = "{\"method\":\"client.show_message\",\"params\":[\"h\u{e9}llo\"]}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xc3).unwrap() + 1;

        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&line[..split]).unwrap().is_empty());
        let frames = decoder.feed(&line[split..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("h\u{e9}llo"));
    }

    #[test]
    fn test_invalid_utf8_line_is_framing_error() {
        let mut decoder = FrameDecoder::new();
        let err = decoder.feed(b"{\"id\":\"\xff\"}\n").unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }

    #[test]
    fn test_unterminated_frame_over_limit() {
        let mut decoder = FrameDecoder::with_max_frame_length(16);
        assert!(decoder.feed(b"{\"id\":1,").unwrap().is_empty());
        let err = decoder.feed(b"\"method\":\"mining.notify\"").unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }

    #[test]
    fn test_complete_frame_over_limit() {
        let mut decoder = FrameDecoder::with_max_frame_length(16);
        assert_eq!(decoder.feed(b"{\"id\":1}\n").unwrap(), vec![r#"{"id":1}"#.to_string()]);
        let err = decoder.feed(b"{\"id\":1,\"result\":true}\n").unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }
}
