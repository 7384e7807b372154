use crate::phoneme::{TextPiece, normalize_word, split_words};

/// Inline control character marking a cue point in segment text.
pub const MARKER_CHAR: char = '\u{1F}';

/// Segment text with markers stripped and whitespace collapsed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreparedText {
    pub text: String,
    /// Char positions in `text` the markers pointed at, in order of appearance.
    pub markers: Vec<usize>,
    /// Whitespace was trimmed before the first character.
    pub leading_space: bool,
    /// Whitespace was trimmed after the last character.
    pub trailing_space: bool,
    /// How many of the last markers sit after that trimmed whitespace.
    pub trailing_markers: usize,
}

pub fn prepare_text(raw: &str) -> PreparedText {
    let mut text = String::with_capacity(raw.len());
    let mut len = 0usize;
    let mut last_space = true;
    let mut markers = Vec::new();
    let mut leading_space = false;
    let mut seen_space = false;
    let mut trailing_markers = 0;
    for ch in raw.chars() {
        if ch == MARKER_CHAR {
            markers.push(len);
            if seen_space {
                trailing_markers += 1;
            }
        } else if ch.is_whitespace() {
            seen_space = true;
            if len == 0 {
                leading_space = true;
            }
            if !last_space {
                text.push(' ');
                len += 1;
                last_space = true;
            }
        } else {
            text.push(ch);
            len += 1;
            last_space = false;
            seen_space = false;
            trailing_markers = 0;
        }
    }
    let trailing_space = text.ends_with(' ');
    if trailing_space {
        text.pop();
        len -= 1;
    }
    for marker in &mut markers {
        *marker = (*marker).min(len);
    }
    PreparedText {
        text,
        markers,
        leading_space,
        trailing_space,
        trailing_markers,
    }
}

/// Encoder symbols of one segment plus where its markers landed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transcription {
    pub symbols: Vec<char>,
    /// Symbol positions of the markers, relative to this segment.
    pub markers: Vec<usize>,
    /// Symbols rejected by the filter.
    pub dropped: Vec<char>,
    /// Words the lookup did not know; spelled out as-is.
    pub missing: Vec<String>,
}

/// Replace every word by its phonemes and move each marker along.
///
/// A marker before or after a word stays at that boundary; one inside a word
/// lands at the same fraction of the word's phonemes.
pub fn transcribe(
    prepared: &PreparedText,
    lookup: impl Fn(&str) -> Option<String>,
    keep: impl Fn(char) -> bool,
) -> Transcription {
    let mut result = Transcription::default();
    let mut pending = prepared.markers.iter().copied().peekable();

    for piece in split_words(&prepared.text) {
        let raw: Vec<char> = match &piece {
            TextPiece::Word { text, .. } => match lookup(text) {
                Some(phonemes) => phonemes.chars().collect(),
                None => {
                    result.missing.push(text.clone());
                    normalize_word(text).chars().collect()
                }
            },
            TextPiece::Symbol { ch, .. } => vec![*ch],
        };
        let mut symbols = Vec::with_capacity(raw.len());
        for ch in raw {
            if keep(ch) {
                symbols.push(ch);
            } else {
                result.dropped.push(ch);
            }
        }

        let before = result.symbols.len();
        while let Some(&marker) = pending.peek() {
            if marker >= piece.end() {
                break;
            }
            let position = if marker <= piece.start() {
                before
            } else {
                let fraction = (marker - piece.start()) as f32 / piece.len() as f32;
                before + (fraction * symbols.len() as f32).round() as usize
            };
            result.markers.push(position);
            pending.next();
        }
        result.symbols.extend(symbols);
    }

    let end = result.symbols.len();
    result.markers.extend(pending.map(|_| end));
    result
}

/// Maps segment-local marker positions to output sample offsets.
#[derive(Clone, Debug)]
pub struct MarkerAligner {
    offset: usize,
    samples_per_symbol: f32,
    positions: Vec<usize>,
    carried: usize,
}

impl MarkerAligner {
    /// `leading` counts symbols placed before the first segment (the start sentinel).
    pub fn new(leading: usize, samples_per_symbol: f32) -> Self {
        Self {
            offset: leading,
            samples_per_symbol,
            positions: Vec::new(),
            carried: 0,
        }
    }

    pub fn push_segment(&mut self, transcription: &Transcription) {
        if !transcription.symbols.is_empty() {
            self.carried = 0;
        }
        self.positions
            .extend(transcription.markers.iter().map(|position| self.offset + position));
        self.offset += transcription.symbols.len();
    }

    /// Let the last `count` markers follow the next separator instead of preceding it.
    pub fn carry(&mut self, count: usize) {
        self.carried = (self.carried + count).min(self.positions.len());
    }

    /// Account for symbols emitted between segments. Carried markers move past them.
    pub fn skip(&mut self, symbols: usize) {
        let start = self.positions.len() - self.carried;
        for position in &mut self.positions[start..] {
            *position += symbols;
        }
        self.carried = 0;
        self.offset += symbols;
    }

    /// Global symbol positions of every marker so far.
    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    pub fn sample_offsets(&self) -> Vec<usize> {
        self.positions
            .iter()
            .map(|&position| (position as f32 * self.samples_per_symbol).round() as usize)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_collapses_whitespace_around_markers() {
        let prepared = prepare_text("  a \u{1F} \tb  \u{1F}");
        assert_eq!(prepared.text, "a b");
        assert_eq!(prepared.markers, vec![2, 3]);
        assert!(prepared.leading_space);
        assert!(!prepared.trailing_space);
    }

    #[test]
    fn test_prepare_remembers_trimmed_edges() {
        let prepared = prepare_text("hello ");
        assert_eq!(prepared.text, "hello");
        assert!(!prepared.leading_space);
        assert!(prepared.trailing_space);
        assert!(prepare_text(" ").leading_space);

        let trailing = prepare_text("a\u{1F} \u{1F}");
        assert_eq!(trailing.markers, vec![1, 1]);
        assert_eq!(trailing.trailing_markers, 1);
    }

    #[test]
    fn test_unknown_word_is_spelled_out() {
        let prepared = prepare_text("Zed");
        let transcription = transcribe(&prepared, |_| None, |_| true);
        assert_eq!(transcription.symbols, vec!['z', 'e', 'd']);
        assert_eq!(transcription.missing, vec!["Zed".to_string()]);
    }
}
