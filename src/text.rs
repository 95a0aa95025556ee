//! Character vectorizer for transcripts.
//!
//! Maps text onto a fixed 34-symbol vocabulary and a fixed output length:
//!
//! ```text
//! index:  0   1   2   3   4..=29   30   31   32   33
//! symbol: -   #   <   >   a..=z   ' '  '.'  ','  '?'
//!         pad unk start end
//! ```

/// Padding / blank symbol index.
pub const PAD_INDEX: u32 = 0;
/// Index for characters outside the vocabulary.
pub const UNKNOWN_INDEX: u32 = 1;
/// Start-of-sequence marker index.
pub const START_INDEX: u32 = 2;
/// End-of-sequence marker index.
pub const END_INDEX: u32 = 3;

const PAD: char = '-';
const UNKNOWN: char = '#';
const START: char = '<';
const END: char = '>';

/// Text → fixed-length index sequence codec.
#[derive(Debug, Clone)]
pub struct Vectorizer {
    vocab: Vec<char>,
    max_len: usize,
}

impl Vectorizer {
    /// `max_len` is the output length, start and end markers included.
    pub fn new(max_len: usize) -> Self {
        let vocab = [PAD, UNKNOWN, START, END]
            .into_iter()
            .chain('a'..='z')
            .chain([' ', '.', ',', '?'])
            .collect();
        Self { vocab, max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Ordered vocabulary; position is the index.
    pub fn vocabulary(&self) -> &[char] {
        &self.vocab
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Symbol at `index`; out-of-range indices map to the unknown symbol.
    pub fn symbol(&self, index: u32) -> char {
        self.vocab.get(index as usize).copied().unwrap_or(UNKNOWN)
    }

    /// Index of `ch`, or [`UNKNOWN_INDEX`] when it is not in the vocabulary.
    pub fn index_of(&self, ch: char) -> u32 {
        self.vocab
            .iter()
            .position(|&c| c == ch)
            .map_or(UNKNOWN_INDEX, |i| i as u32)
    }

    /// Lowercase, truncate to `max_len - 2` characters, wrap in start/end
    /// markers and right-pad with [`PAD_INDEX`].
    ///
    /// Always returns exactly `max_len` indices.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        let body = self.max_len.saturating_sub(2);
        let mut out = Vec::with_capacity(self.max_len);
        out.push(START_INDEX);
        out.extend(text.to_lowercase().chars().take(body).map(|c| self.index_of(c)));
        out.push(END_INDEX);
        // Degenerate max_len < 2 still honours the length contract.
        out.truncate(self.max_len);
        out.resize(self.max_len, PAD_INDEX);
        out
    }

    /// Render indices as vocabulary symbols, skipping padding.
    ///
    /// Markers are kept; out-of-range indices render as the unknown symbol.
    pub fn decode(&self, indices: &[u32]) -> String {
        indices
            .iter()
            .filter(|&&i| i != PAD_INDEX)
            .map(|&i| self.symbol(i))
            .collect()
    }

    /// Recover the transcript body: drop padding and the start/end markers.
    pub fn decode_transcript(&self, indices: &[u32]) -> String {
        indices
            .iter()
            .filter(|&&i| !matches!(i, PAD_INDEX | START_INDEX | END_INDEX))
            .map(|&i| self.symbol(i))
            .collect()
    }
}
