//! Audio fragment assembly.
//!
//! Audio arrives as base64 fragments across many stream chunks. Fragments
//! are accumulated as-is and decoded once, after `audioDone` -- individual
//! fragments are arbitrary splits of one base64 string and cannot be
//! decoded on their own. A decode failure degrades to "ready with no
//! playable audio" rather than failing the turn.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

/// Accumulates base64 audio fragments for one in-flight message.
#[derive(Debug, Default)]
pub struct AudioAssembler {
    fragments: Vec<String>,
}

impl AudioAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer one fragment.
    pub fn push(&mut self, fragment: &str) {
        self.fragments.push(fragment.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Concatenate and decode everything buffered so far, consuming the
    /// buffer. Returns `None` when nothing arrived or the payload is not
    /// valid base64.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.fragments.is_empty() {
            return None;
        }
        let joined: String = self.fragments.drain(..).collect();
        match STANDARD.decode(joined.as_bytes()) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!(error = %e, "audio payload failed base64 decode, dropping clip");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembles_split_fragments() {
        // "hello audio" base64-encoded, split mid-character-group.
        let encoded = STANDARD.encode(b"hello audio");
        let (a, b) = encoded.split_at(5);

        let mut assembler = AudioAssembler::new();
        assembler.push(a);
        assembler.push(b);

        assert_eq!(assembler.finish().unwrap(), b"hello audio");
    }

    #[test]
    fn test_single_fragment() {
        let mut assembler = AudioAssembler::new();
        assembler.push(&STANDARD.encode(b"clip"));
        assert_eq!(assembler.finish().unwrap(), b"clip");
    }

    #[test]
    fn test_empty_returns_none() {
        let mut assembler = AudioAssembler::new();
        assert!(assembler.is_empty());
        assert!(assembler.finish().is_none());
    }

    #[test]
    fn test_invalid_base64_degrades_to_none() {
        let mut assembler = AudioAssembler::new();
        assembler.push("not!!valid@@base64");
        assert!(assembler.finish().is_none());
    }

    #[test]
    fn test_finish_consumes_buffer() {
        let mut assembler = AudioAssembler::new();
        assembler.push(&STANDARD.encode(b"clip"));
        let _ = assembler.finish();
        assert!(assembler.is_empty());
        assert!(assembler.finish().is_none());
    }
}
