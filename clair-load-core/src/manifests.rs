//! Resolving container references to scan manifests.

use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cancel::CancelSignal;
use crate::error::{Error, Result};
use crate::sequence::Workload;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("manifest has no usable `hash`: {0}")]
    MissingHash(#[from] serde_json::Error),
}

/// Produces the manifest document for one container reference.
pub trait ManifestSource: Send + Sync {
    fn fetch(&self, container: &str) -> impl Future<Output = std::result::Result<Bytes, ManifestError>> + Send;
}

/// Shells out to `clairctl manifest <container>`.
#[derive(Debug, Clone)]
pub struct ClairctlManifests {
    program: String,
}

impl Default for ClairctlManifests {
    fn default() -> Self {
        Self::new("clairctl")
    }
}

impl ClairctlManifests {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ManifestSource for ClairctlManifests {
    async fn fetch(&self, container: &str) -> std::result::Result<Bytes, ManifestError> {
        tracing::debug!(program = %self.program, container, "getting manifest");

        let output = tokio::process::Command::new(&self.program)
            .arg("manifest")
            .arg(container)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ManifestError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ManifestError::Exit {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(Bytes::from(output.stdout))
    }
}

#[derive(Deserialize)]
struct ManifestHash {
    hash: String,
}

/// Extract the content hash a manifest is addressed by.
pub fn manifest_hash(manifest: &[u8]) -> std::result::Result<String, ManifestError> {
    Ok(serde_json::from_slice::<ManifestHash>(manifest)?.hash)
}

/// `{prefix}_tag_1` through `{prefix}_tag_{count}`.
pub fn containers_from_prefix(prefix: &str, count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{prefix}_tag_{i}")).collect()
}

/// Fetch every container's manifest with at most `concurrency` fetches running.
///
/// Containers that fail are logged and left out; the rest keep their input order.
/// Once `cancel` fires no further fetch starts, and the ones still running are
/// dropped, which kills their child processes.
pub async fn resolve<S>(
    source: Arc<S>,
    containers: &[String],
    concurrency: usize,
    cancel: &CancelSignal,
) -> Result<Workload>
where
    S: ManifestSource + 'static,
{
    if concurrency == 0 {
        return Err(Error::InvalidConcurrency);
    }

    let permits = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();

    for (idx, container) in containers.iter().cloned().enumerate() {
        let source = Arc::clone(&source);
        let permits = Arc::clone(&permits);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let resolved = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                resolved = fetch_one(source.as_ref(), &permits, &container) => Some(resolved),
            };
            (idx, container, resolved)
        });
    }

    let mut slots: Vec<Option<(Bytes, String)>> = vec![None; containers.len()];
    let mut finished = 0usize;
    loop {
        let done = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            done = tasks.join_next() => done,
        };
        let Some(done) = done else { break };

        let (idx, container, resolved) = done.map_err(Error::ManifestTask)?;
        match resolved {
            Some(Ok(entry)) => slots[idx] = Some(entry),
            Some(Err(e)) => tracing::warn!(container, error = %e, "dropping container"),
            None => break,
        }
        finished += 1;
    }

    if cancel.is_cancelled() {
        tasks.abort_all();
        tracing::warn!(finished, total = containers.len(), "manifest resolution cancelled");
        return Err(Error::ResolveCancelled {
            finished,
            total: containers.len(),
        });
    }

    let (manifests, hashes): (Vec<_>, Vec<_>) = slots.into_iter().flatten().unzip();
    tracing::info!(
        requested = containers.len(),
        resolved = manifests.len(),
        "manifests resolved"
    );
    Ok(Workload { manifests, hashes })
}

async fn fetch_one<S: ManifestSource>(
    source: &S,
    permits: &Semaphore,
    container: &str,
) -> std::result::Result<(Bytes, String), ManifestError> {
    // The semaphore is never closed.
    let _permit = permits.acquire().await;
    let manifest = source.fetch(container).await?;
    let hash = manifest_hash(&manifest)?;
    Ok((manifest, hash))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeSource {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ManifestSource for FakeSource {
        async fn fetch(&self, container: &str) -> std::result::Result<Bytes, ManifestError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            // Later containers finish first, so ordering is not accidental.
            let n: u64 = container.rsplit('_').next().and_then(|s| s.parse().ok()).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(50u64.saturating_sub(n * 5))).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if container.ends_with("_3") {
                return Ok(Bytes::from_static(b"not json"));
            }
            Ok(Bytes::from(format!(r#"{{"hash":"sha256:{container}","layers":[]}}"#)))
        }
    }

    #[test]
    fn prefix_expands_to_numbered_tags() {
        assert_eq!(
            containers_from_prefix("quay.io/x/repo", 3),
            vec!["quay.io/x/repo_tag_1", "quay.io/x/repo_tag_2", "quay.io/x/repo_tag_3"]
        );
        assert!(containers_from_prefix("p", 0).is_empty());
    }

    #[tokio::test]
    async fn resolve_keeps_order_drops_failures_and_bounds_concurrency() {
        let source = Arc::new(FakeSource::default());
        let containers = containers_from_prefix("r", 6);

        let workload = resolve(Arc::clone(&source), &containers, 2, &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(
            workload.hashes,
            vec!["sha256:r_tag_1", "sha256:r_tag_2", "sha256:r_tag_4", "sha256:r_tag_5", "sha256:r_tag_6"]
        );
        assert_eq!(workload.manifests.len(), 5);
        assert!(source.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let err = resolve(Arc::new(FakeSource::default()), &["a".to_string()], 0, &CancelSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConcurrency));
    }

    #[derive(Default)]
    struct SlowSource {
        started: AtomicUsize,
    }

    impl ManifestSource for SlowSource {
        async fn fetch(&self, container: &str) -> std::result::Result<Bytes, ManifestError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Bytes::from(format!(r#"{{"hash":"sha256:{container}"}}"#)))
        }
    }

    #[tokio::test]
    async fn cancel_stops_new_fetches_and_returns_promptly() {
        let source = Arc::new(SlowSource::default());
        let containers = containers_from_prefix("r", 4);
        let cancel = CancelSignal::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cancel.cancel();
            })
        };

        let started = std::time::Instant::now();
        let err = resolve(Arc::clone(&source), &containers, 1, &cancel)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, Error::ResolveCancelled { finished: 0, total: 4 }), "{err}");
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(source.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn already_cancelled_starts_nothing() {
        let source = Arc::new(SlowSource::default());
        let cancel = CancelSignal::new();
        cancel.cancel();

        let err = resolve(Arc::clone(&source), &containers_from_prefix("r", 3), 2, &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_program_is_a_fetch_error() {
        let source = ClairctlManifests::new("clairctl-does-not-exist-here");
        let err = source.fetch("ubuntu:latest").await.unwrap_err();
        assert!(matches!(err, ManifestError::Spawn { .. }));
    }
}
