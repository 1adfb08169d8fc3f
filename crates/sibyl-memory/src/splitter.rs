//! Sentence-aware text splitter.
//!
//! Chunks never overlap: joining them with single spaces reconstructs the
//! input up to whitespace collapsing, so reconstruction stays lossless for
//! the retriever's parent lookup.

#[derive(Debug, Clone)]
pub struct SplitterConfig {
    /// Upper bound on chunk length in characters. A single sentence longer
    /// than this becomes its own chunk.
    pub max_chars: usize,
    /// Sentence terminators. Whitespace terminators cut unconditionally;
    /// the rest only cut when followed by whitespace or end of input.
    pub terminators: Vec<char>,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            terminators: vec!['.', '!', '?', '\n'],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Splitter {
    config: SplitterConfig,
}

impl Splitter {
    #[must_use]
    pub fn new(config: SplitterConfig) -> Self {
        Self { config }
    }

    /// Split `text` into chunks of at most `max_chars` characters, cutting
    /// only on sentence boundaries. Deterministic.
    #[must_use]
    pub fn split(&self, text: &str) -> Vec<String> {
        let sentences = split_sentences(text, &self.config.terminators);
        pack_sentences(sentences, self.config.max_chars)
    }
}

/// Convenience wrapper with the default terminator set.
#[must_use]
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    Splitter::new(SplitterConfig {
        max_chars,
        ..SplitterConfig::default()
    })
    .split(text)
}

fn split_sentences(text: &str, terminators: &[char]) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if terminators.contains(&c) {
            let cuts = c.is_whitespace()
                || chars.peek().is_none_or(|next| next.is_whitespace());
            if cuts {
                flush(&mut current, &mut sentences);
            }
        }
    }
    flush(&mut current, &mut sentences);
    sentences
}

/// Collapse internal whitespace and push unless empty.
fn flush(current: &mut String, sentences: &mut Vec<String>) {
    let collapsed = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !collapsed.is_empty() {
        sentences.push(collapsed);
    }
    current.clear();
}

fn pack_sentences(sentences: Vec<String>, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        if current.is_empty() {
            current = sentence;
            continue;
        }
        if current.chars().count() + 1 + sentence.chars().count() > max_chars {
            chunks.push(std::mem::take(&mut current));
            current = sentence;
        } else {
            current.push(' ');
            current.push_str(&sentence);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
