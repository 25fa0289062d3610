pub mod cache;
pub mod engine;
pub mod policy;
pub mod results;

/// A piece of content that can be submitted to the detection engine.
///
/// Implementations exist per ingestion source (a string held in memory, a
/// file inside a docker layer, ...). Content is decoded lazily: `url()` never
/// touches it, `is_longer_than` decodes only when the raw byte size cannot
/// answer on its own, and `content()` caches the decode for the lifetime of
/// the unit. A unit is scanned at most once per run, so the cache is never
/// invalidated.
pub trait Scannable {
    /// Stable identifier used for reporting. Never loads content.
    fn url(&self) -> String;

    /// Whether the decoded content is strictly longer than `n` characters.
    /// Equality is "not longer".
    fn is_longer_than(&mut self, n: usize) -> bool;

    /// The decoded text. Invalid UTF-8 sequences are replaced rather than
    /// failing the scan.
    fn content(&mut self) -> &str;
}

/// A scannable over a string already held in memory (image config JSON,
/// build args, ...).
pub struct StringScannable {
    url: String,
    content: String,
}

impl StringScannable {
    pub fn new(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: content.into(),
        }
    }
}

impl Scannable for StringScannable {
    fn url(&self) -> String {
        self.url.clone()
    }

    fn is_longer_than(&mut self, n: usize) -> bool {
        self.content.chars().count() > n
    }

    fn content(&mut self) -> &str {
        &self.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_scannable_length_boundary() {
        let mut s = StringScannable::new("config", "abcde");
        assert!(s.is_longer_than(4));
        assert!(!s.is_longer_than(5));
        assert!(!s.is_longer_than(6));
    }

    #[test]
    fn string_scannable_counts_chars_not_bytes() {
        // 3 chars, 7 bytes
        let mut s = StringScannable::new("config", "aé中");
        assert!(s.is_longer_than(2));
        assert!(!s.is_longer_than(3));
    }
}
