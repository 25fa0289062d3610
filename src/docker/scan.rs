use std::path::Path;

use tracing::{info, warn};

use super::archive::DockerImage;
use crate::error::{Result, ScanError};
use crate::scan::Scannable;
use crate::scan::cache::LayerIdCache;
use crate::scan::engine::{IgnoredMatch, SecretEngine};
use crate::scan::policy::FilepathPolicy;
use crate::scan::results::{LayerStats, Results, ScanCollection, UnitResult};

/// Stage notifications for the UI layer, one per layer decision.
pub enum ScanEvent<'a> {
    Config,
    ScanningLayer {
        diff_id: &'a str,
        files: usize,
        bytes: usize,
    },
    SkippedCached { diff_id: &'a str },
    SkippedEmpty { diff_id: &'a str },
}

pub type OnEvent<'a> = &'a mut dyn FnMut(ScanEvent);

/// Scan one exported image archive end to end.
///
/// The config unit is always submitted, never cached: it is one small
/// document whose findings can change independently of any layer. Layers are
/// processed strictly in build order; a layer whose batch comes back with no
/// policy breaks is recorded clean, a layer with findings is left out of the
/// cache so it is re-scanned until the secret is gone or ignored.
///
/// Archive structure problems and engine failures abort the whole run; in
/// the engine case nothing from the in-flight layer reaches the cache.
pub fn scan_docker_archive(
    archive_path: &Path,
    engine: &dyn SecretEngine,
    policy: &FilepathPolicy,
    cache: &mut LayerIdCache,
    ignored: &[IgnoredMatch],
    mut on_event: Option<OnEvent>,
) -> Result<ScanCollection> {
    let image = DockerImage::open(archive_path)?;
    let mut results = Results::default();
    let mut stats = LayerStats {
        ignored: image.ignored_layer_count(),
        ..LayerStats::default()
    };

    emit(&mut on_event, ScanEvent::Config);
    let mut config = image.config_scannable();
    let config_url = config.url();
    let mut config_units: [&mut dyn Scannable; 1] = [&mut config];
    let findings = submit(engine, &mut config_units, ignored)?;
    results.results.push(UnitResult {
        url: config_url,
        findings: findings.into_iter().next().unwrap_or_default(),
    });

    for descriptor in image.layers() {
        let (mut units, skips) = image.open_layer(descriptor, policy)?;
        results.errors.extend(skips);

        if units.is_empty() {
            // Nothing survived filtering; the cache is not even consulted.
            stats.empty += 1;
            emit(&mut on_event, ScanEvent::SkippedEmpty { diff_id: &descriptor.diff_id });
            continue;
        }

        if cache.contains(&descriptor.diff_id) {
            info!(diff_id = %descriptor.diff_id, "layer already scanned clean");
            stats.cached += 1;
            emit(&mut on_event, ScanEvent::SkippedCached { diff_id: &descriptor.diff_id });
            continue;
        }

        emit(
            &mut on_event,
            ScanEvent::ScanningLayer {
                diff_id: &descriptor.diff_id,
                files: units.len(),
                bytes: units.iter().map(|u| u.size_hint()).sum(),
            },
        );

        let urls: Vec<String> = units.iter().map(|u| u.url()).collect();
        let mut batch: Vec<&mut dyn Scannable> =
            units.iter_mut().map(|u| u as &mut dyn Scannable).collect();
        let findings = submit(engine, &mut batch, ignored)?;

        let mut layer_results = Results::default();
        for (url, findings) in urls.into_iter().zip(findings) {
            layer_results.results.push(UnitResult { url, findings });
        }

        if !layer_results.has_policy_breaks() {
            if let Err(err) = cache.add(&descriptor.diff_id) {
                warn!(diff_id = %descriptor.diff_id, %err, "could not persist clean-layer cache");
            }
        }
        stats.scanned += 1;
        results.extend(layer_results);
    }

    Ok(ScanCollection::new(
        archive_path.display().to_string(),
        "scan_docker_archive",
        results,
        stats,
    ))
}

fn submit(
    engine: &dyn SecretEngine,
    units: &mut [&mut dyn Scannable],
    ignored: &[IgnoredMatch],
) -> Result<Vec<Vec<crate::scan::results::Finding>>> {
    let findings = engine.scan(units, ignored)?;
    if findings.len() != units.len() {
        return Err(ScanError::EngineUnavailable(format!(
            "engine returned {} results for {} documents",
            findings.len(),
            units.len()
        )));
    }
    Ok(findings)
}

fn emit(on_event: &mut Option<OnEvent>, event: ScanEvent) {
    if let Some(f) = on_event {
        f(event);
    }
}
