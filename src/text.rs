//! Text folding with an offset map back to the source.
//!
//! Classifiers search a folded copy of the utterance (canonical decomposition,
//! combining marks dropped, lowercased) but must report spans in the caller's
//! character offsets. [`FoldedText`] keeps, for every folded char, the index of
//! the source char it came from.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::TextSpan;

#[derive(Debug, Clone)]
pub(crate) struct FoldedText {
    pub text: String,
    /// `origins[i]` is the source char index of folded char `i`.
    origins: Vec<usize>,
    /// Byte offset of each folded char, for byte -> char conversion.
    byte_starts: Vec<usize>,
    source_len: usize,
}

impl FoldedText {
    pub fn new(source: &str) -> Self {
        let mut text = String::with_capacity(source.len());
        let mut origins = Vec::with_capacity(source.len());
        let mut byte_starts = Vec::with_capacity(source.len());
        let mut source_len = 0;

        for (idx, c) in source.chars().enumerate() {
            source_len = idx + 1;
            for d in std::iter::once(c).nfd() {
                if is_combining_mark(d) {
                    continue;
                }
                for lower in d.to_lowercase() {
                    byte_starts.push(text.len());
                    origins.push(idx);
                    text.push(lower);
                }
            }
        }

        Self { text, origins, byte_starts, source_len }
    }

    /// Map a byte range of the folded text back to a char span of the source.
    pub fn source_span(&self, byte_start: usize, byte_end: usize) -> TextSpan {
        let first = self.char_at(byte_start);
        let last = self.char_at(byte_end);
        let start = self.origins.get(first).copied().unwrap_or(self.source_len);
        let end = if last > first { self.origins[last - 1] + 1 } else { start };
        TextSpan::new(start, end)
    }

    fn char_at(&self, byte: usize) -> usize {
        match self.byte_starts.binary_search(&byte) {
            Ok(idx) => idx,
            Err(idx) => idx,
        }
    }
}

/// Fold a standalone string the same way [`FoldedText`] does.
pub(crate) fn fold(s: &str) -> String {
    FoldedText::new(s).text
}

/// Lowercase, trim and collapse inner whitespace.
pub(crate) fn normalize_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folding_strips_accents_and_case() {
        let folded = FoldedText::new("Évry-Courcouronnes");
        assert_eq!(folded.text, "evry-courcouronnes");
    }

    #[test]
    fn spans_map_back_to_source_chars() {
        // "é" decomposes to two chars before the mark is dropped; offsets stay on the source.
        let source = "à Genève demain";
        let folded = FoldedText::new(source);
        let start = folded.text.find("geneve").unwrap();
        let span = folded.source_span(start, start + "geneve".len());
        assert_eq!(span, TextSpan::new(2, 8));
        assert_eq!(span.text_of(source), "Genève");
    }

    #[test]
    fn empty_range_at_end_maps_to_source_len() {
        let folded = FoldedText::new("abc");
        assert_eq!(folded.source_span(3, 3), TextSpan::new(3, 3));
    }

    #[test]
    fn normalize_spaces_collapses() {
        assert_eq!(normalize_spaces("  At   10 "), "at 10");
    }
}
