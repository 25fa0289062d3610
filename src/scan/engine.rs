use std::io::{Read, Write};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ScanError};
use crate::scan::Scannable;
use crate::scan::results::Finding;

/// A previously accepted match, forwarded to the engine so it is not
/// reported again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoredMatch {
    pub kind: String,
    #[serde(rename = "match")]
    pub match_text: String,
}

/// Client for the external detection engine.
///
/// The engine owns all pattern/entropy logic; this side only ships batches of
/// documents and zips findings back. `version()` identifies the ruleset in
/// effect and namespaces the clean-layer cache.
pub trait SecretEngine {
    fn version(&self) -> &str;

    /// Submit one batch. The returned vector has exactly one entry per unit,
    /// in submission order. Any transport or protocol failure is
    /// `EngineUnavailable` and fatal for the run.
    fn scan(
        &self,
        units: &mut [&mut dyn Scannable],
        ignored: &[IgnoredMatch],
    ) -> Result<Vec<Vec<Finding>>>;
}

// ---- Wire format for the subprocess adapter ----

#[derive(Serialize)]
struct ScanRequest<'a> {
    documents: Vec<Document>,
    ignored_matches: &'a [IgnoredMatch],
}

#[derive(Serialize)]
struct Document {
    url: String,
    content: String,
}

#[derive(Deserialize)]
struct ScanResponse {
    results: Vec<DocumentResult>,
}

#[derive(Deserialize)]
struct DocumentResult {
    #[serde(default)]
    findings: Vec<Finding>,
}

#[derive(Deserialize)]
struct InfoResponse {
    secrets_engine_version: String,
}

/// Talks to an engine adapter binary: `<program> info` reports the ruleset
/// version as JSON, `<program> scan` takes a request on stdin and answers
/// with findings on stdout. The adapter hides whatever network transport the
/// real engine sits behind.
pub struct CommandEngine {
    program: String,
    version: String,
}

impl CommandEngine {
    pub fn connect(program: &str) -> Result<Self> {
        let output = Command::new(program)
            .arg("info")
            .output()
            .map_err(|e| ScanError::EngineUnavailable(format!("could not run `{program} info`: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScanError::EngineUnavailable(format!(
                "`{program} info` failed: {}",
                stderr.trim()
            )));
        }
        let info: InfoResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| ScanError::EngineUnavailable(format!("bad `{program} info` reply: {e}")))?;
        debug!(version = %info.secrets_engine_version, "connected to detection engine");
        Ok(Self {
            program: program.to_string(),
            version: info.secrets_engine_version,
        })
    }
}

impl SecretEngine for CommandEngine {
    fn version(&self) -> &str {
        &self.version
    }

    fn scan(
        &self,
        units: &mut [&mut dyn Scannable],
        ignored: &[IgnoredMatch],
    ) -> Result<Vec<Vec<Finding>>> {
        let documents = units
            .iter_mut()
            .map(|u| Document {
                url: u.url(),
                content: u.content().to_string(),
            })
            .collect();
        let request = ScanRequest {
            documents,
            ignored_matches: ignored,
        };
        let body = serde_json::to_vec(&request)
            .map_err(|e| ScanError::EngineUnavailable(e.to_string()))?;

        let unavailable =
            |e: std::io::Error| ScanError::EngineUnavailable(format!("`{} scan`: {e}", self.program));

        let mut child = Command::new(&self.program)
            .arg("scan")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(unavailable)?;

        // Feed stdin and drain stderr on threads so neither pipe can fill
        // while this side blocks reading the reply from stdout.
        let mut stdin = child.stdin.take().expect("stdin was piped");
        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            stdin.write_all(&body)?;
            Ok(())
        });
        let mut stderr_pipe = child.stderr.take().expect("stderr was piped");
        let stderr_reader = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf);
            buf
        });

        let mut stdout = Vec::new();
        child
            .stdout
            .take()
            .expect("stdout was piped")
            .read_to_end(&mut stdout)
            .map_err(unavailable)?;
        let status = child.wait().map_err(unavailable)?;
        let _ = writer.join();
        let stderr = stderr_reader.join().unwrap_or_default();

        if !status.success() {
            return Err(ScanError::EngineUnavailable(format!(
                "`{} scan` exited with {status}: {}",
                self.program,
                stderr.trim()
            )));
        }

        let response: ScanResponse = serde_json::from_slice(&stdout)
            .map_err(|e| ScanError::EngineUnavailable(format!("bad engine reply: {e}")))?;
        if response.results.len() != units.len() {
            return Err(ScanError::EngineUnavailable(format!(
                "engine returned {} results for {} documents",
                response.results.len(),
                units.len()
            )));
        }
        Ok(response.results.into_iter().map(|r| r.findings).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_format() {
        let request = ScanRequest {
            documents: vec![Document {
                url: "sha256:aaa:/app/.env".to_string(),
                content: "TOKEN=xyz".to_string(),
            }],
            ignored_matches: &[IgnoredMatch {
                kind: "Generic High Entropy Secret".to_string(),
                match_text: "deadbeef".to_string(),
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["documents"][0]["url"], "sha256:aaa:/app/.env");
        assert_eq!(json["ignored_matches"][0]["match"], "deadbeef");
    }

    #[test]
    fn response_parsing_defaults_missing_findings() {
        let response: ScanResponse =
            serde_json::from_str(r#"{"results":[{},{"findings":[{"detector":"AWS Keys","matched":"AKIA"}]}]}"#)
                .unwrap();
        assert_eq!(response.results.len(), 2);
        assert!(response.results[0].findings.is_empty());
        assert_eq!(response.results[1].findings[0].detector, "AWS Keys");
    }

    #[test]
    fn info_parsing() {
        let info: InfoResponse =
            serde_json::from_str(r#"{"secrets_engine_version":"2.106.0"}"#).unwrap();
        assert_eq!(info.secrets_engine_version, "2.106.0");
    }

    #[cfg(unix)]
    fn fake_adapter(dir: &std::path::Path, script: &str) -> CommandEngine {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("engine-adapter");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        CommandEngine {
            program: path.display().to_string(),
            version: "0.0.0".to_string(),
        }
    }

    #[cfg(unix)]
    #[test]
    fn chatty_adapter_stderr_does_not_wedge_the_scan() {
        use crate::scan::StringScannable;

        // Dumps well past a pipe buffer to stderr before touching stdin.
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_adapter(
            dir.path(),
            concat!(
                "head -c 200000 /dev/zero | tr '\\0' 'x' >&2\n",
                "cat > /dev/null\n",
                r#"printf '{"results":[{"findings":[]}]}'"#
            ),
        );

        let mut unit = StringScannable::new("config", "TOKEN=x");
        let findings = engine.scan(&mut [&mut unit], &[]).unwrap();
        assert_eq!(findings.len(), 1);
        assert!(findings[0].is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn failing_adapter_surfaces_its_stderr() {
        use crate::scan::StringScannable;

        let dir = tempfile::tempdir().unwrap();
        let engine = fake_adapter(dir.path(), "cat > /dev/null\necho 'ruleset expired' >&2\nexit 2");

        let mut unit = StringScannable::new("config", "TOKEN=x");
        let err = engine.scan(&mut [&mut unit], &[]).unwrap_err();
        match err {
            ScanError::EngineUnavailable(reason) => assert!(reason.contains("ruleset expired")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
