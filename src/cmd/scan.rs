use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::style::Stylize;

use crate::docker::scan::{ScanEvent, scan_docker_archive};
use crate::docker::tool;
use crate::progress::{self, Spinner};
use crate::scan::cache::LayerIdCache;
use crate::scan::engine::{CommandEngine, IgnoredMatch, SecretEngine};
use crate::scan::policy::FilepathPolicy;
use crate::scan::results::ScanCollection;

pub struct ScanArgs<'a> {
    /// Image ref, or path to an already-exported archive.
    pub target: &'a str,
    /// Engine adapter binary.
    pub engine: &'a str,
    /// Timeout for each `docker` invocation.
    pub timeout: Duration,
    /// Extra path exclusion wildcards.
    pub excludes: &'a [String],
    /// Optional JSON file of previously accepted matches.
    pub ignore_file: Option<&'a Path>,
}

/// Run a scan. Returns true when secrets were found (caller maps that to a
/// non-zero exit).
pub fn run(args: &ScanArgs) -> Result<bool> {
    let engine = CommandEngine::connect(args.engine)?;
    let policy = FilepathPolicy::with_excludes(args.excludes)?;
    let mut cache = LayerIdCache::for_engine_version(engine.version());
    let ignored = load_ignored_matches(args.ignore_file)?;

    let (archive_path, tmp) = resolve_archive(args.target, args.timeout)?;

    let mut on_event = |event: ScanEvent| match event {
        ScanEvent::Config => progress::heading("Scanning image configuration"),
        ScanEvent::ScanningLayer { diff_id, files, bytes } => {
            progress::heading(format!("Scanning layer {diff_id} ({files} files, {bytes} bytes)"));
        }
        ScanEvent::SkippedCached { diff_id } => {
            progress::heading(format!("Skipping layer {diff_id}: already scanned"));
        }
        ScanEvent::SkippedEmpty { .. } => {}
    };

    let collection = scan_docker_archive(
        &archive_path,
        &engine,
        &policy,
        &mut cache,
        &ignored,
        Some(&mut on_event),
    );

    if let Some(tmp) = tmp {
        let _ = fs::remove_file(tmp);
    }
    let collection = collection.with_context(|| format!("scan of {} failed", args.target))?;

    print_summary(&collection);
    Ok(collection.has_secrets())
}

/// `docker save` the image to a temp file unless the target already is an
/// archive on disk.
fn resolve_archive(target: &str, timeout: Duration) -> Result<(PathBuf, Option<PathBuf>)> {
    if looks_like_archive(target) {
        return Ok((PathBuf::from(target), None));
    }

    let tmp = std::env::temp_dir().join(format!("layersweep-save-{}.tar", std::process::id()));
    let spinner = Spinner::new(format!("Saving {target} ..."));
    match tool::docker_save(target, &tmp, timeout) {
        Ok(()) => {
            spinner.finish(format!("Saved {target}"));
            Ok((tmp.clone(), Some(tmp)))
        }
        Err(err) => {
            spinner.clear();
            let _ = fs::remove_file(&tmp);
            Err(err.into())
        }
    }
}

fn looks_like_archive(target: &str) -> bool {
    let p = Path::new(target);
    p.is_file()
        && (matches!(p.extension().and_then(|e| e.to_str()), Some("tar"))
            || target.ends_with(".tar.gz"))
}

fn load_ignored_matches(path: Option<&Path>) -> Result<Vec<IgnoredMatch>> {
    match path {
        None => Ok(Vec::new()),
        Some(path) => {
            let bytes = fs::read(path)
                .with_context(|| format!("could not read ignore file {}", path.display()))?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("invalid ignore file {}", path.display()))
        }
    }
}

fn print_summary(collection: &ScanCollection) {
    eprintln!();
    for result in &collection.results.results {
        for finding in &result.findings {
            let location = match finding.line {
                Some(line) => format!("{}:{line}", result.url),
                None => result.url.clone(),
            };
            println!("{} {} in {}", "✘".red(), finding.detector.clone().bold(), location);
        }
    }
    for skip in &collection.results.errors {
        eprintln!("{} skipped {}: {}", "!".yellow(), skip.url, skip.reason);
    }

    let stats = collection.stats;
    let breakdown = format!(
        "{} scanned, {} cached, {} empty, {} not scan-worthy",
        stats.scanned, stats.cached, stats.empty, stats.ignored
    );
    let findings = collection.results.finding_count();
    if findings > 0 {
        eprintln!("{} {findings} secret(s) found ({breakdown})", "✘".red());
    } else if stats.scanned == 0 {
        // Nothing went to the engine beyond the config; make that visible
        // instead of claiming a clean bill of health.
        eprintln!("{} no layers scanned ({breakdown})", "!".yellow());
    } else {
        eprintln!("{} no secrets found ({breakdown})", "✔".green());
    }
}
