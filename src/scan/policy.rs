use std::sync::LazyLock;

use regex::{Regex, RegexSet};

use crate::error::Result;

/// Path prefixes that are never worth scanning: system, library, and vendored
/// directories that ship with base images. Prefix-anchored, tolerating a
/// leading `/`. `usr/` is handled separately because `usr/share/nginx` is a
/// common place for hand-written config and stays scannable.
const FILEPATH_BANLIST: &[&str] = &[
    r"^/?lib/",
    r"^/?share/",
    r"^/?bin/",
    r"^/?sbin/",
    r"^/?node_modules/",
    r"^/?include/",
    r"^/?vendor/",
    r"^/?texlive/",
    r"^/?var/",
    r"^/?fonts/",
    r"^/?npm/",
    r"^/?site-packages/",
];

static BANLIST: LazyLock<RegexSet> =
    LazyLock::new(|| RegexSet::new(FILEPATH_BANLIST).expect("banlist patterns are valid"));

static USR_BAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/?usr/").unwrap());
static USR_ALLOW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/?usr/share/nginx").unwrap());

/// Extensions whose content is binary and never holds a readable secret.
const BINARY_EXTENSIONS: &[&str] = &[
    "7z", "a", "avi", "bin", "bmp", "bz2", "class", "db", "deb", "dll", "dylib", "eot", "exe",
    "gif", "gz", "ico", "jar", "jpeg", "jpg", "mov", "mp3", "mp4", "o", "obj", "otf", "pdf", "png",
    "pyc", "pyo", "rlib", "rpm", "so", "sqlite", "svgz", "tar", "tgz", "ttf", "wasm", "webp",
    "woff", "woff2", "xz", "zip",
];

/// Decides whether a path inside a layer is worth scanning. Stateless apart
/// from user-supplied exclusion wildcards compiled at construction.
pub struct FilepathPolicy {
    excludes: Vec<Regex>,
}

impl Default for FilepathPolicy {
    fn default() -> Self {
        Self { excludes: Vec::new() }
    }
}

impl FilepathPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer fnmatch-style wildcards (`*`, `?`) on top of the fixed banlist.
    pub fn with_excludes(patterns: &[String]) -> Result<Self> {
        let excludes = patterns
            .iter()
            .map(|p| Regex::new(&wildcard_to_regex(p)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { excludes })
    }

    pub fn is_scan_worthy(&self, path: &str) -> bool {
        if USR_BAN.is_match(path) && !USR_ALLOW.is_match(path) {
            return false;
        }
        if BANLIST.is_match(path) {
            return false;
        }
        if is_binary_path(path) {
            return false;
        }
        if self.excludes.iter().any(|re| re.is_match(path)) {
            return false;
        }
        true
    }
}

/// Extension-based binary classifier, shared across ingestion modes.
pub fn is_binary_path(path: &str) -> bool {
    match path.rsplit_once('.') {
        Some((_, ext)) => BINARY_EXTENSIONS
            .iter()
            .any(|b| b.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

/// Content-signature check applied after a file's bytes are read: a NUL in
/// the leading window marks the file binary regardless of its name.
pub fn is_binary_content(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(8192)];
    window.contains(&0)
}

/// Translate an fnmatch-style wildcard into an anchored regex.
fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    out.push_str("/?");
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}
