// Copyright 2026 OPeNDAP, Inc.

//! Streaming recognition of a fixed byte sequence.

use bytes::Bytes;

/// Recognizes a mark inside a byte stream fed one byte at a time.
///
/// The cursor only ever advances on an exact match of the next expected
/// byte. Any mismatch resets it to zero without re-examining the
/// offending byte; callers that need to recover overlapping matches keep
/// the suspect bytes themselves (see `reader::MarkedReader`).
#[derive(Debug, Clone)]
pub struct MarkFinder {
    mark: Bytes,
    mark_index: usize,
}

impl MarkFinder {
    /// An empty mark never matches.
    pub fn new(mark: impl Into<Bytes>) -> MarkFinder {
        MarkFinder {
            mark: mark.into(),
            mark_index: 0,
        }
    }

    /// Returns `true` when `b` completes the mark. The cursor is back at
    /// zero afterwards.
    pub fn check(&mut self, b: u8) -> bool {
        match self.mark.get(self.mark_index) {
            Some(&expected) if expected == b => {
                self.mark_index += 1;
                if self.mark_index == self.mark.len() {
                    self.mark_index = 0;
                    return true;
                }
                false
            }
            _ => {
                self.mark_index = 0;
                false
            }
        }
    }

    pub fn mark_index(&self) -> usize {
        self.mark_index
    }

    pub fn mark(&self) -> &[u8] {
        &self.mark
    }

    pub fn reset(&mut self) {
        self.mark_index = 0;
    }
}
