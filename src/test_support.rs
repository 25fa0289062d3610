//! Builders for synthetic `docker save` archives used across tests.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

struct LayerSpec {
    command: String,
    files: Vec<(String, Vec<u8>)>,
}

/// A written fixture archive plus the diff_ids of its non-empty layers, in
/// build order (diff_id = sha256 of the uncompressed layer tar, as docker
/// computes it).
pub struct Fixture {
    pub path: PathBuf,
    pub diff_ids: Vec<String>,
}

#[derive(Default)]
pub struct ArchiveBuilder {
    gzip: bool,
    layers: Vec<LayerSpec>,
    empty_history: Vec<String>,
    extra_diff_ids: Vec<String>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compress layer tars with gzip, as `docker save` does for pulled images.
    pub fn gzip_layers(mut self) -> Self {
        self.gzip = true;
        self
    }

    /// Add a non-empty layer with its build command and files.
    pub fn layer(mut self, command: &str, files: &[(&str, &[u8])]) -> Self {
        self.layers.push(LayerSpec {
            command: command.to_string(),
            files: files
                .iter()
                .map(|(p, d)| (p.to_string(), d.to_vec()))
                .collect(),
        });
        self
    }

    /// Add a history entry marked `empty_layer` (no archive, no diff_id).
    pub fn empty_history(mut self, command: &str) -> Self {
        self.empty_history.push(command.to_string());
        self
    }

    /// Append a diff_id with no matching layer, to produce a mismatched
    /// archive.
    pub fn extra_diff_id(mut self, diff_id: &str) -> Self {
        self.extra_diff_ids.push(diff_id.to_string());
        self
    }

    pub fn write(self, dir: &Path) -> Fixture {
        let path = dir.join("image.tar");
        let mut outer = tar::Builder::new(std::fs::File::create(&path).unwrap());

        let mut diff_ids = Vec::new();
        let mut layer_names = Vec::new();
        let mut history = Vec::new();

        for (i, layer) in self.layers.iter().enumerate() {
            let tar_bytes = build_layer_tar(&layer.files);
            let diff_id = format!("sha256:{:x}", Sha256::digest(&tar_bytes));

            let stored = if self.gzip {
                let mut enc =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
                enc.write_all(&tar_bytes).unwrap();
                enc.finish().unwrap()
            } else {
                tar_bytes
            };

            let name = format!("layer{i}/layer.tar");
            append_entry(&mut outer, &name, &stored);

            diff_ids.push(diff_id);
            layer_names.push(name);
            history.push(serde_json::json!({ "created_by": layer.command }));
        }
        for command in &self.empty_history {
            history.push(serde_json::json!({ "created_by": command, "empty_layer": true }));
        }

        let mut all_diff_ids = diff_ids.clone();
        all_diff_ids.extend(self.extra_diff_ids.iter().cloned());

        let config = serde_json::json!({
            "architecture": "amd64",
            "config": { "Env": ["PATH=/usr/bin"] },
            "history": history,
            "rootfs": { "type": "layers", "diff_ids": all_diff_ids },
        });
        let config_bytes = serde_json::to_vec(&config).unwrap();
        let config_name = format!("{:x}.json", Sha256::digest(&config_bytes));
        append_entry(&mut outer, &config_name, &config_bytes);

        let manifest = serde_json::json!([{
            "Config": config_name,
            "RepoTags": ["fixture:latest"],
            "Layers": layer_names,
        }]);
        append_entry(&mut outer, "manifest.json", &serde_json::to_vec(&manifest).unwrap());

        outer.finish().unwrap();
        Fixture { path, diff_ids }
    }
}

fn build_layer_tar(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        append_entry(&mut builder, path, data);
    }
    builder.into_inner().unwrap()
}

fn append_entry<W: Write>(builder: &mut tar::Builder<W>, path: &str, data: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, path, data).unwrap();
}
