use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use super::LayerDescriptor;
use super::content::LayerFileScannable;
use crate::error::{Result, ScanError};
use crate::scan::StringScannable;
use crate::scan::policy::{self, FilepathPolicy};
use crate::scan::results::ScanSkip;

// ---- `docker save` archive structs (manifest.json + image config) ----

#[derive(Deserialize)]
struct ManifestEntry {
    #[serde(rename = "Config")]
    config: String,
    #[serde(rename = "Layers")]
    layers: Vec<String>,
}

#[derive(Deserialize)]
struct ImageConfig {
    #[serde(default)]
    history: Vec<HistoryEntry>,
    rootfs: Rootfs,
}

#[derive(Deserialize)]
struct Rootfs {
    diff_ids: Vec<String>,
}

#[derive(Deserialize)]
struct HistoryEntry {
    created_by: Option<String>,
    #[serde(default)]
    empty_layer: bool,
}

/// An opened `docker save` archive, reduced to what a scan needs: the
/// ordered scan-worthy layers and the raw image config.
///
/// Construction parses `manifest.json` and the referenced config JSON, then
/// zips non-empty history entries against the manifest's layer list and the
/// config's diff_ids. The three sequences must align positionally; a length
/// mismatch means the archive is lying about its own structure and nothing
/// in it can be trusted.
#[derive(Debug)]
pub struct DockerImage {
    archive_path: PathBuf,
    config_json: String,
    layers: Vec<LayerDescriptor>,
    ignored_layers: usize,
}

impl DockerImage {
    pub fn open(archive_path: &Path) -> Result<Self> {
        let mut manifest_data: Option<Vec<u8>> = None;
        let mut configs: HashMap<String, Vec<u8>> = HashMap::new();

        // Single pass for the small metadata entries; layer tars are only
        // touched later, one at a time.
        for_each_entry(archive_path, |entry_path, entry| {
            if entry_path == "manifest.json" {
                let mut data = Vec::new();
                entry
                    .read_to_end(&mut data)
                    .map_err(|e| ScanError::malformed(format!("unreadable manifest.json: {e}")))?;
                manifest_data = Some(data);
            } else if entry_path.ends_with(".json") {
                let mut data = Vec::new();
                entry
                    .read_to_end(&mut data)
                    .map_err(|e| ScanError::malformed(format!("unreadable {entry_path}: {e}")))?;
                configs.insert(entry_path.to_string(), data);
            }
            Ok(())
        })?;

        let manifest_data =
            manifest_data.ok_or_else(|| ScanError::malformed("no manifest.json entry"))?;
        let entries: Vec<ManifestEntry> = serde_json::from_slice(&manifest_data)
            .map_err(|e| ScanError::malformed(format!("unparsable manifest.json: {e}")))?;
        let manifest = entries
            .into_iter()
            .next()
            .ok_or_else(|| ScanError::malformed("empty manifest.json"))?;

        let config_data = configs.remove(&manifest.config).ok_or_else(|| {
            ScanError::malformed(format!("config {} not found in archive", manifest.config))
        })?;
        let config: ImageConfig = serde_json::from_slice(&config_data).map_err(|e| {
            ScanError::malformed(format!("unparsable image config {}: {e}", manifest.config))
        })?;
        // Re-serialized pretty so findings in it get readable line numbers.
        let config_json = serde_json::from_slice::<serde_json::Value>(&config_data)
            .and_then(|v| serde_json::to_string_pretty(&v))
            .map_err(|e| ScanError::malformed(format!("unparsable image config: {e}")))?;

        let non_empty: Vec<&HistoryEntry> =
            config.history.iter().filter(|h| !h.empty_layer).collect();
        let diff_ids = &config.rootfs.diff_ids;
        if non_empty.len() != manifest.layers.len() || non_empty.len() != diff_ids.len() {
            return Err(ScanError::malformed(format!(
                "layer metadata mismatch: {} layer archives, {} non-empty history entries, {} diff_ids",
                manifest.layers.len(),
                non_empty.len(),
                diff_ids.len()
            )));
        }

        let mut layers = Vec::with_capacity(diff_ids.len());
        let mut ignored_layers = 0;
        for ((filename, history), diff_id) in
            manifest.layers.iter().zip(&non_empty).zip(diff_ids)
        {
            let descriptor = LayerDescriptor {
                filename: filename.clone(),
                command: history.created_by.clone().unwrap_or_default(),
                diff_id: diff_id.clone(),
            };
            if descriptor.should_scan() {
                layers.push(descriptor);
            } else {
                debug!(diff_id = %descriptor.diff_id, command = %descriptor.command,
                       "layer not scan-worthy");
                ignored_layers += 1;
            }
        }

        Ok(Self {
            archive_path: archive_path.to_path_buf(),
            config_json,
            layers,
            ignored_layers,
        })
    }

    /// Scan-worthy layers, oldest first.
    pub fn layers(&self) -> &[LayerDescriptor] {
        &self.layers
    }

    /// Non-empty layers that were classified not worth scanning.
    pub fn ignored_layer_count(&self) -> usize {
        self.ignored_layers
    }

    /// The image config as a scannable unit. Build args and environment
    /// leak here independently of any layer content.
    pub fn config_scannable(&self) -> StringScannable {
        StringScannable::new("Dockerfile or build-args", self.config_json.clone())
    }

    /// Enumerate the scannable files of one layer.
    ///
    /// Streams the named inner tar (gzip-sniffed) without materializing the
    /// layer: at most one file's bytes are buffered at a time, and only for
    /// files that pass the path policy. Entries that cannot be read are
    /// returned as skips, not errors — one rotten file must not sink the
    /// image.
    pub fn open_layer(
        &self,
        descriptor: &LayerDescriptor,
        policy: &FilepathPolicy,
    ) -> Result<(Vec<LayerFileScannable>, Vec<ScanSkip>)> {
        let mut found = None;
        for_each_entry(&self.archive_path, |entry_path, entry| {
            if entry_path == descriptor.filename && found.is_none() {
                found = Some(collect_layer_units(&descriptor.diff_id, entry, policy)?);
            }
            Ok(())
        })?;
        found.ok_or_else(|| {
            ScanError::malformed(format!(
                "layer {} not found in archive",
                descriptor.filename
            ))
        })
    }
}

/// Stream the top-level archive, calling `f` with each entry's path.
fn for_each_entry<F>(archive_path: &Path, mut f: F) -> Result<()>
where
    F: for<'a> FnMut(&str, &mut tar::Entry<'a, File>) -> Result<()>,
{
    let file = File::open(archive_path).map_err(|e| ScanError::io(archive_path, e))?;
    let mut archive = tar::Archive::new(file);
    let entries = archive
        .entries()
        .map_err(|e| ScanError::malformed(format!("not a tar archive: {e}")))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| ScanError::malformed(format!("corrupt tar entry: {e}")))?;
        let entry_path = entry
            .path()
            .map_err(|e| ScanError::malformed(format!("corrupt tar entry path: {e}")))?
            .to_string_lossy()
            .into_owned();
        f(&entry_path, &mut entry)?;
    }
    Ok(())
}

/// Read a layer tar (possibly gzipped) and build one scannable per regular,
/// non-empty, policy-passing file.
fn collect_layer_units<R: Read>(
    diff_id: &str,
    reader: &mut R,
    policy: &FilepathPolicy,
) -> Result<(Vec<LayerFileScannable>, Vec<ScanSkip>)> {
    // Sniff the gzip magic, then put the sniffed bytes back in front.
    let mut head = [0u8; 2];
    let mut got = 0;
    while got < 2 {
        let n = reader
            .read(&mut head[got..])
            .map_err(|e| ScanError::malformed(format!("unreadable layer {diff_id}: {e}")))?;
        if n == 0 {
            break;
        }
        got += n;
    }
    let rewound = Cursor::new(head[..got].to_vec()).chain(reader);

    if got == 2 && head == [0x1f, 0x8b] {
        scan_inner_tar(diff_id, flate2::read::GzDecoder::new(rewound), policy)
    } else {
        scan_inner_tar(diff_id, rewound, policy)
    }
}

fn scan_inner_tar<R: Read>(
    diff_id: &str,
    reader: R,
    policy: &FilepathPolicy,
) -> Result<(Vec<LayerFileScannable>, Vec<ScanSkip>)> {
    let mut archive = tar::Archive::new(reader);
    let mut units = Vec::new();
    let mut skips = Vec::new();

    let entries = archive
        .entries()
        .map_err(|e| ScanError::malformed(format!("layer {diff_id} is not a tar: {e}")))?;
    for entry in entries {
        let mut entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!(diff_id, %err, "skipping corrupt layer entry");
                continue;
            }
        };

        if !entry.header().entry_type().is_file() {
            continue;
        }
        if entry.size() == 0 {
            continue;
        }

        let path = match entry.path() {
            Ok(p) => p.to_string_lossy().into_owned(),
            Err(_) => continue,
        };

        // Overlay whiteout markers describe deletions, they carry no content.
        if Path::new(&path)
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with(".wh."))
        {
            continue;
        }

        if !policy.is_scan_worthy(&path) {
            continue;
        }

        let mut raw = Vec::with_capacity(entry.size() as usize);
        if let Err(err) = entry.read_to_end(&mut raw) {
            warn!(diff_id, path, %err, "could not extract layer entry");
            skips.push(ScanSkip {
                url: format!("{diff_id}:/{path}"),
                reason: format!("unreadable entry: {err}"),
            });
            continue;
        }

        if policy::is_binary_content(&raw) {
            debug!(diff_id, path, "skipping binary content");
            continue;
        }

        units.push(LayerFileScannable::new(diff_id, path, raw));
    }

    Ok((units, skips))
}
