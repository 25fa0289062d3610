pub mod archive;
pub mod content;
pub mod scan;
pub mod tool;

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Commands that can bring file content into a layer. Anything else (RUN,
/// ENV, LABEL, ...) leaves the filesystem alone as far as the Dockerfile
/// says. Commands with file side effects hidden behind RUN (`curl -o` and
/// friends) slip through this test; accepted trade-off.
static LAYER_TO_SCAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(copy|add)\b").unwrap());

/// One non-empty layer of an image, reconstructed from the archive manifest
/// and image config. Built once at archive-open time, read-only after.
#[derive(Debug, Clone, Serialize)]
pub struct LayerDescriptor {
    /// Path of the layer's tar inside the top-level archive.
    pub filename: String,
    /// The build command that produced the layer, or `""` when the history
    /// entry carries none.
    pub command: String,
    /// Content-addressed identifier of the layer's filesystem diff.
    pub diff_id: String,
}

impl LayerDescriptor {
    /// Whether the layer is worth scanning. Layers with no recorded command
    /// have unknown provenance and must be scanned; otherwise only COPY/ADD
    /// layers can introduce files.
    pub fn should_scan(&self) -> bool {
        self.command.is_empty() || LAYER_TO_SCAN.is_match(&self.command)
    }
}
