//! Shared tokenizer.

/// Minimum word length (in chars) before bigrams are emitted.
const BIGRAM_MIN_CHARS: usize = 3;

/// Split text into hashing features.
///
/// Every lowercased run of alphanumeric characters is a feature. Runs of at
/// least three characters also contribute their character bigrams, prefixed
/// with `#` so they never collide with a two-letter word.
pub fn features(text: &str) -> Vec<String> {
    let mut out = Vec::new();

    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let word = word.to_lowercase();
        let chars: Vec<char> = word.chars().collect();

        if chars.len() >= BIGRAM_MIN_CHARS {
            for pair in chars.windows(2) {
                out.push(format!("#{}{}", pair[0], pair[1]));
            }
        }
        out.push(word);
    }

    out
}
