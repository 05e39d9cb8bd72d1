/// Incremental UTF-8 decoding for PTY output.
///
/// A read can end in the middle of a multi-byte character. The incomplete
/// tail is held back until the next chunk instead of being replaced with
/// U+FFFD. Bytes that can never form a character are still replaced.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk` after any bytes held back from the previous call.
    /// Returns an empty string when the whole chunk is a partial character.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest = buf.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // `valid_up_to` guarantees this prefix is well-formed.
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush a held-back tail that will never be completed.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&tail).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_through() {
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.decode(b"hello"), "hello");
        assert!(dec.finish().is_none());
    }

    #[test]
    fn split_two_byte_char_is_joined() {
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.decode(&[b'a', 0xC3]), "a");
        assert_eq!(dec.decode(&[0xA9, b'b']), "\u{e9}b");
    }

    #[test]
    fn four_byte_char_split_three_ways() {
        let crab = "\u{1F980}".as_bytes();
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.decode(&crab[..1]), "");
        assert_eq!(dec.decode(&crab[1..3]), "");
        assert_eq!(dec.decode(&crab[3..]), "\u{1F980}");
    }

    #[test]
    fn invalid_bytes_are_replaced_and_decoding_continues() {
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.decode(&[b'x', 0xFF, b'y']), "x\u{FFFD}y");
        assert!(dec.finish().is_none());
    }

    #[test]
    fn unfinished_tail_is_flushed_lossily() {
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.decode(&[b'z', 0xE2, 0x82]), "z");
        assert_eq!(dec.finish().as_deref(), Some("\u{FFFD}"));
        assert!(dec.finish().is_none());
    }
}
