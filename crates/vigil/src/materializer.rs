//! Result Materializer
//!
//! Turns the raw result of a completed job into a local file. Runs once per
//! job: the prober only hands a result over after taking the job out of the
//! registry, so a second probe can never trigger a second download.
//!
//! A failed download does not fail the job. The remote computation
//! succeeded; the caller gets `completed` plus a warning.

use std::path::{Path, PathBuf};

use crate::domain::{Job, RemoteResult};
use crate::remote::JobBackend;

/// Directory that materialized artifacts are written into.
#[derive(Debug, Clone)]
pub struct OutputDir {
    path: PathBuf,
}

impl OutputDir {
    /// Resolve the output directory, creating it if absent.
    pub async fn resolve(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        tokio::fs::create_dir_all(&path).await?;
        tracing::debug!(path = %path.display(), "Output directory ready");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `{kind}-{id}.{extension}` with the id escaped into a filename-safe
    /// form. The escaping is reversible, so distinct ids never share a file.
    pub fn file_for(&self, job: &Job, extension: &str) -> PathBuf {
        let extension = extension.trim_start_matches('.');
        self.path.join(format!(
            "{}-{}.{}",
            job.kind,
            escape_id(job.id.as_str()),
            extension
        ))
    }
}

/// Keep `[A-Za-z0-9-]`; every other byte becomes `_XX` (uppercase hex).
/// `_` itself is escaped, which keeps the mapping one-to-one.
fn escape_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("_{:02X}", byte));
        }
    }
    out
}

/// Write via a sibling `.part` file and rename, so a failed write never
/// leaves a truncated artifact under the final name.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    let result = match tokio::fs::write(&partial, bytes).await {
        Ok(()) => tokio::fs::rename(&partial, path).await,
        Err(e) => Err(e),
    };
    if result.is_err() {
        let _ = tokio::fs::remove_file(&partial).await;
    }
    result
}

/// What happened when a completed job's result was materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    /// Artifact written to this path.
    Saved(PathBuf),
    /// The remote reported completion but produced nothing to save.
    Empty,
    /// Fetch or write failed; the reason is a human-readable warning.
    Failed(String),
}

impl Materialized {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Materialized::Saved(path) => Some(path),
            _ => None,
        }
    }

    /// Warning to show alongside a completed job, if any.
    pub fn warning(&self) -> Option<String> {
        match self {
            Materialized::Saved(_) => None,
            Materialized::Empty => {
                Some("remote job completed but returned no artifact".to_string())
            }
            Materialized::Failed(reason) => Some(format!(
                "remote job completed but the artifact could not be saved: {}",
                reason
            )),
        }
    }
}

/// Fetches completed results and saves them under an [`OutputDir`].
#[derive(Debug, Clone)]
pub struct Materializer {
    output: OutputDir,
}

impl Materializer {
    pub fn new(output: OutputDir) -> Self {
        Self { output }
    }

    pub fn output_dir(&self) -> &OutputDir {
        &self.output
    }

    /// Make one fetch-and-save attempt for `job`. On success the path is
    /// attached to the job.
    #[tracing::instrument(
        name = "vigil.materialize",
        skip(self, backend, job, result),
        fields(job.id = %job.id, job.kind = %job.kind)
    )]
    pub async fn materialize(
        &self,
        backend: &dyn JobBackend,
        job: &mut Job,
        result: Option<&RemoteResult>,
    ) -> Materialized {
        let Some(result) = result else {
            tracing::warn!("Completed without a result payload");
            return Materialized::Empty;
        };

        let fetched = match backend.fetch(result).await {
            Ok(Some(fetched)) => fetched,
            Ok(None) => {
                tracing::warn!("Result carried nothing to save");
                return Materialized::Empty;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Artifact fetch failed");
                return Materialized::Failed(e.to_string());
            }
        };

        let path = self.output.file_for(job, &fetched.extension);
        if let Err(e) = write_atomic(&path, &fetched.bytes).await {
            tracing::warn!(path = %path.display(), error = %e, "Artifact write failed");
            return Materialized::Failed(format!("writing {}: {}", path.display(), e));
        }

        job.attach_artifact(&path);
        tracing::info!(
            path = %path.display(),
            bytes = fetched.bytes.len(),
            "Artifact saved"
        );

        Materialized::Saved(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobId, JobKind, RemoteHandle};
    use crate::testing::ScriptedBackend;

    fn job(id: &str) -> Job {
        Job::new(
            JobId::from(id),
            JobKind::Video,
            RemoteHandle::new(serde_json::Value::Null),
        )
    }

    async fn materializer() -> (tempfile::TempDir, Materializer) {
        let dir = tempfile::tempdir().unwrap();
        let output = OutputDir::resolve(dir.path().join("nested/output")).await.unwrap();
        (dir, Materializer::new(output))
    }

    #[tokio::test]
    async fn resolve_creates_missing_directory() {
        let (_dir, materializer) = materializer().await;
        assert!(materializer.output_dir().path().is_dir());
    }

    #[test]
    fn file_names_are_filesystem_safe() {
        let output = OutputDir {
            path: PathBuf::from("/out"),
        };
        let path = output.file_for(&job("models/veo/operations/abc:1"), ".mp4");
        assert_eq!(
            path,
            PathBuf::from("/out/video-models_2Fveo_2Foperations_2Fabc_3A1.mp4")
        );
    }

    #[test]
    fn distinct_ids_get_distinct_files() {
        let output = OutputDir {
            path: PathBuf::from("/out"),
        };
        let ids = ["a/b", "a_b", "a:b", "a_2Fb", "_a/b_"];
        let files: std::collections::HashSet<PathBuf> = ids
            .iter()
            .map(|id| output.file_for(&job(id), "mp4"))
            .collect();
        assert_eq!(files.len(), ids.len());
    }

    #[tokio::test]
    async fn failed_write_leaves_no_partial_file() {
        let (_dir, materializer) = materializer().await;
        let backend = ScriptedBackend::new(JobKind::Video);
        let mut job = job("op-5");
        // A directory squatting on the final name makes the rename fail.
        let target = materializer.output_dir().file_for(&job, "mp4");
        std::fs::create_dir(&target).unwrap();
        let result = RemoteResult::new(serde_json::json!({ "uri": "x" }));

        let outcome = materializer.materialize(&backend, &mut job, Some(&result)).await;

        assert!(matches!(outcome, Materialized::Failed(_)));
        assert!(job.artifact.is_none());
        let leftovers: Vec<_> = std::fs::read_dir(materializer.output_dir().path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty(), "partial files left: {:?}", leftovers);
    }

    #[tokio::test]
    async fn saves_fetched_bytes() {
        let (_dir, materializer) = materializer().await;
        let backend = ScriptedBackend::new(JobKind::Video);
        let mut job = job("op-1");
        let result = RemoteResult::new(serde_json::json!({ "uri": "https://example/v.mp4" }));

        let outcome = materializer.materialize(&backend, &mut job, Some(&result)).await;

        let path = outcome.path().unwrap().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"rendered");
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
        assert_eq!(job.artifact, Some(path));
        assert!(outcome.warning().is_none());
    }

    #[tokio::test]
    async fn missing_result_is_empty_without_fetch() {
        let (_dir, materializer) = materializer().await;
        let backend = ScriptedBackend::new(JobKind::Video);
        let mut job = job("op-2");

        let outcome = materializer.materialize(&backend, &mut job, None).await;

        assert_eq!(outcome, Materialized::Empty);
        assert_eq!(backend.fetch_count(), 0);
        assert!(job.artifact.is_none());
    }

    #[tokio::test]
    async fn nothing_to_fetch_is_empty() {
        let (_dir, materializer) = materializer().await;
        let backend = ScriptedBackend::new(JobKind::Video).fetching_nothing();
        let mut job = job("op-3");
        let result = RemoteResult::new(serde_json::json!({}));

        let outcome = materializer.materialize(&backend, &mut job, Some(&result)).await;

        assert_eq!(outcome, Materialized::Empty);
        assert!(outcome.warning().unwrap().contains("no artifact"));
    }

    #[tokio::test]
    async fn fetch_failure_is_a_warning() {
        let (_dir, materializer) = materializer().await;
        let backend = ScriptedBackend::new(JobKind::Video).failing_fetch();
        let mut job = job("op-4");
        let result = RemoteResult::new(serde_json::json!({ "uri": "gone" }));

        let outcome = materializer.materialize(&backend, &mut job, Some(&result)).await;

        assert!(matches!(outcome, Materialized::Failed(_)));
        assert!(outcome.warning().unwrap().contains("file expired"));
        assert!(job.artifact.is_none());
    }
}
