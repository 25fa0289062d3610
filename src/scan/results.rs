use serde::{Deserialize, Serialize};

/// One secret occurrence reported by the detection engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Name of the detector that fired (e.g. "AWS Keys").
    pub detector: String,
    /// The matched text, as returned by the engine.
    pub matched: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    /// True when the engine already knows this secret from an earlier report.
    #[serde(default)]
    pub known_secret: bool,
}

/// Engine findings zipped back to the unit they came from.
#[derive(Debug, Clone, Serialize)]
pub struct UnitResult {
    /// Provenance identifier: `<diff_id>:/<path>` for layer files, a label
    /// for in-memory units.
    pub url: String,
    pub findings: Vec<Finding>,
}

impl UnitResult {
    pub fn has_policy_breaks(&self) -> bool {
        !self.findings.is_empty()
    }
}

/// A file that could not be scanned. Informational, never fatal.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSkip {
    pub url: String,
    pub reason: String,
}

/// Results and per-file skips accumulated over one or more batches.
#[derive(Debug, Default, Serialize)]
pub struct Results {
    pub results: Vec<UnitResult>,
    pub errors: Vec<ScanSkip>,
}

impl Results {
    pub fn extend(&mut self, other: Results) {
        self.results.extend(other.results);
        self.errors.extend(other.errors);
    }

    pub fn has_policy_breaks(&self) -> bool {
        self.results.iter().any(UnitResult::has_policy_breaks)
    }

    pub fn finding_count(&self) -> usize {
        self.results.iter().map(|r| r.findings.len()).sum()
    }
}

/// Per-layer dispositions, kept so "everything was clean" and "nothing was
/// actually scanned" stay distinguishable in the summary.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct LayerStats {
    /// Layers whose units were submitted to the engine this run.
    pub scanned: usize,
    /// Layers skipped because their diff_id was already recorded clean.
    pub cached: usize,
    /// Scan-worthy layers that yielded zero units after filtering.
    pub empty: usize,
    /// Non-empty layers classified not worth scanning (no copy/add verb).
    pub ignored: usize,
}

/// Aggregated outcome of scanning one archive.
#[derive(Debug, Serialize)]
pub struct ScanCollection {
    /// The archive path, used by reporting to identify the scan.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub results: Results,
    pub stats: LayerStats,
}

impl ScanCollection {
    pub fn new(id: String, kind: &str, results: Results, stats: LayerStats) -> Self {
        Self {
            id,
            kind: kind.to_string(),
            results,
            stats,
        }
    }

    pub fn has_secrets(&self) -> bool {
        self.results.has_policy_breaks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(detector: &str) -> Finding {
        Finding {
            detector: detector.to_string(),
            matched: "AKIA...".to_string(),
            line: Some(3),
            known_secret: false,
        }
    }

    #[test]
    fn extend_merges_results_and_errors() {
        let mut all = Results::default();
        all.results.push(UnitResult {
            url: "config".to_string(),
            findings: vec![],
        });

        let mut layer = Results::default();
        layer.results.push(UnitResult {
            url: "sha256:aaa:/app/.env".to_string(),
            findings: vec![finding("AWS Keys")],
        });
        layer.errors.push(ScanSkip {
            url: "sha256:aaa:/app/blob".to_string(),
            reason: "unreadable entry".to_string(),
        });

        all.extend(layer);
        assert_eq!(all.results.len(), 2);
        assert_eq!(all.errors.len(), 1);
        assert!(all.has_policy_breaks());
        assert_eq!(all.finding_count(), 1);
    }

    #[test]
    fn no_findings_means_no_policy_breaks() {
        let mut all = Results::default();
        all.results.push(UnitResult {
            url: "config".to_string(),
            findings: vec![],
        });
        assert!(!all.has_policy_breaks());
    }
}
