use std::collections::HashMap;

/// Word → phoneme string lookup of one language.
///
/// Starts from the language's lexicon and grows as the phonemizer resolves
/// unknown words; a memoized word is never phonemized again while the
/// language stays loaded.
#[derive(Clone, Debug, Default)]
pub struct PhonemeTable {
    entries: HashMap<String, String>,
    learned: usize,
}

impl PhonemeTable {
    pub fn new(lexicon: HashMap<String, String>) -> Self {
        let entries = lexicon
            .into_iter()
            .map(|(word, phonemes)| (normalize_word(&word), phonemes))
            .collect();
        Self {
            entries,
            learned: 0,
        }
    }

    pub fn get(&self, word: &str) -> Option<&str> {
        self.entries.get(&normalize_word(word)).map(|p| p.as_str())
    }

    pub fn contains(&self, word: &str) -> bool {
        self.entries.contains_key(&normalize_word(word))
    }

    /// Remember a phonemizer result. Existing entries are kept.
    pub fn memoize(&mut self, word: &str, phonemes: String) -> bool {
        let key = normalize_word(word);
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, phonemes);
        self.learned += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries added by the phonemizer.
    pub fn learned(&self) -> usize {
        self.learned
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.learned = 0;
    }
}

pub fn normalize_word(word: &str) -> String {
    word.to_lowercase()
}

pub fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '\''
}

/// A piece of normalized text, positions counted in chars.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TextPiece {
    Word { text: String, start: usize, len: usize },
    Symbol { ch: char, start: usize },
}

impl TextPiece {
    pub fn start(&self) -> usize {
        match self {
            TextPiece::Word { start, .. } | TextPiece::Symbol { start, .. } => *start,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TextPiece::Word { len, .. } => *len,
            TextPiece::Symbol { .. } => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn end(&self) -> usize {
        self.start() + self.len()
    }
}

/// Split text into words (runs of alphanumerics and apostrophes) and single symbols.
pub fn split_words(text: &str) -> Vec<TextPiece> {
    let mut pieces = Vec::new();
    let mut word = String::new();
    let mut word_start = 0;
    for (index, ch) in text.chars().enumerate() {
        if is_word_char(ch) {
            if word.is_empty() {
                word_start = index;
            }
            word.push(ch);
            continue;
        }
        if !word.is_empty() {
            let len = word.chars().count();
            pieces.push(TextPiece::Word {
                text: std::mem::take(&mut word),
                start: word_start,
                len,
            });
        }
        pieces.push(TextPiece::Symbol { ch, start: index });
    }
    if !word.is_empty() {
        let len = word.chars().count();
        pieces.push(TextPiece::Word {
            text: word,
            start: word_start,
            len,
        });
    }
    pieces
}
