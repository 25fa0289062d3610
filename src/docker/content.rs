use crate::scan::Scannable;

/// A single regular file inside a layer archive, scannable without decoding
/// until content is actually needed.
///
/// The raw bytes are read while streaming the layer tar (tar entries cannot
/// be revisited once the reader moves past them); the expensive part, UTF-8
/// validation and replacement, is deferred and cached on first use.
#[derive(Debug)]
pub struct LayerFileScannable {
    layer_id: String,
    path: String,
    byte_size: usize,
    raw: Vec<u8>,
    text: Option<String>,
}

impl LayerFileScannable {
    pub fn new(layer_id: impl Into<String>, path: impl Into<String>, raw: Vec<u8>) -> Self {
        Self {
            layer_id: layer_id.into(),
            path: path.into(),
            byte_size: raw.len(),
            raw,
            text: None,
        }
    }

    /// Recorded byte size of the entry. An upper bound on the decoded
    /// character count, since every char consumes at least one byte.
    pub fn size_hint(&self) -> usize {
        self.byte_size
    }

    fn decode(&mut self) -> &str {
        if self.text.is_none() {
            let raw = std::mem::take(&mut self.raw);
            let text = match String::from_utf8(raw) {
                // Valid UTF-8: reuse the buffer instead of copying it.
                Ok(s) => s,
                Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
            };
            self.text = Some(text);
        }
        self.text.as_deref().expect("just populated")
    }
}

impl Scannable for LayerFileScannable {
    fn url(&self) -> String {
        format!("{}:/{}", self.layer_id, self.path)
    }

    fn is_longer_than(&mut self, n: usize) -> bool {
        if let Some(text) = &self.text {
            return text.chars().count() > n;
        }
        if self.byte_size < n {
            // Decoded length can only shrink relative to byte length.
            return false;
        }
        self.decode().chars().count() > n
    }

    fn content(&mut self) -> &str {
        self.decode()
    }
}
