//! Directory reconciliation: make the mods directory hold exactly the files the
//! server manifest lists, using content hashes to decide what is up to date.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use futures_util::stream;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::config::{LauncherConfig, has_extension};
use crate::engine::models::{DeletionFailure, Manifest, ManifestEntry, SyncReport};
use crate::error::{LauncherError, io_err};
use crate::networking::NetworkClient;

pub mod hasher;
pub mod manifest;

const PARTIAL_SUFFIX: &str = ".part";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    NotStarted,
    Fetching,
    Reconciling,
    Ready,
    Degraded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryAction {
    Verified,
    Fetched,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    Phase(SyncPhase),
    Deleted {
        name: String,
    },
    DeleteFailed {
        name: String,
        reason: String,
    },
    Checking {
        name: String,
    },
    Downloading {
        name: String,
        downloaded: u64,
        total: Option<u64>,
        speed: String,
    },
    /// `completed` counts finished entries and only ever increases.
    EntryDone {
        name: String,
        action: EntryAction,
        completed: usize,
        total: usize,
    },
}

pub struct Reconciler {
    network: NetworkClient,
    manifest_url: String,
    mods_dir: PathBuf,
    managed_extension: String,
    concurrency: usize,
    phase: SyncPhase,
}

impl Reconciler {
    pub fn new(config: &LauncherConfig, network: NetworkClient) -> Self {
        Self {
            network,
            manifest_url: config.manifest_url.clone(),
            mods_dir: config.mods_dir(),
            managed_extension: config.managed_extension.clone(),
            concurrency: config.concurrency.max(1),
            phase: SyncPhase::NotStarted,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Run one reconciliation. Never fails outright: problems end the run in
    /// `Degraded` so the caller can still offer a launch.
    pub async fn run(&mut self, events: &mpsc::UnboundedSender<SyncEvent>) -> SyncReport {
        let report = SyncReport::new();
        self.transition(SyncPhase::NotStarted, events);
        self.transition(SyncPhase::Fetching, events);
        info!("sync: fetching manifest from {}", self.manifest_url);

        let manifest =
            match manifest::fetch(&self.network, &self.manifest_url, &self.managed_extension).await
            {
                Ok(manifest) => manifest,
                Err(err) => {
                    warn!("sync: manifest unavailable, leaving mods untouched: {err}");
                    return self.finish(report.degraded(err.to_string()), events);
                }
            };

        self.transition(SyncPhase::Reconciling, events);
        let report = self.reconcile(&manifest, report, events).await;
        self.finish(report, events)
    }

    async fn reconcile(
        &self,
        manifest: &Manifest,
        report: SyncReport,
        events: &mpsc::UnboundedSender<SyncEvent>,
    ) -> SyncReport {
        let local = match self.local_files() {
            Ok(local) => local,
            Err(err) => {
                warn!("sync: unable to list {}: {err}", self.mods_dir.display());
                return report.degraded(err.to_string());
            }
        };
        debug!("sync: {} managed files present locally", local.len());
        self.apply(manifest, local, report, events).await
    }

    /// Deletion pass, then verify/fetch pass, against an already listed set of
    /// local names.
    async fn apply(
        &self,
        manifest: &Manifest,
        mut local: BTreeSet<String>,
        mut report: SyncReport,
        events: &mpsc::UnboundedSender<SyncEvent>,
    ) -> SyncReport {
        self.delete_extraneous(manifest, &mut local, &mut report, events)
            .await;

        if let Err(err) = self.verify_and_fetch(manifest, &local, &mut report, events).await {
            warn!("sync: stopped early: {err}");
            return report.degraded(err.to_string());
        }

        if !report.deletion_failures.is_empty() {
            let reason = format!(
                "{} outdated mod(s) could not be removed",
                report.deletion_failures.len()
            );
            return report.degraded(reason);
        }
        report
    }

    /// Managed files directly inside the mods directory. Creates the directory
    /// when it does not exist yet.
    fn local_files(&self) -> Result<BTreeSet<String>, LauncherError> {
        if !self.mods_dir.exists() {
            std::fs::create_dir_all(&self.mods_dir).map_err(|e| io_err(&self.mods_dir, e))?;
            return Ok(BTreeSet::new());
        }

        let mut names = BTreeSet::new();
        for entry in WalkDir::new(&self.mods_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| io_err(&self.mods_dir, e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                debug!("sync: skipping non UTF-8 name {:?}", entry.file_name());
                continue;
            };
            if has_extension(name, &self.managed_extension) {
                names.insert(name.to_owned());
            }
        }
        Ok(names)
    }

    async fn delete_extraneous(
        &self,
        manifest: &Manifest,
        local: &mut BTreeSet<String>,
        report: &mut SyncReport,
        events: &mpsc::UnboundedSender<SyncEvent>,
    ) {
        let extraneous: Vec<String> = local
            .iter()
            .filter(|name| !manifest.contains(name))
            .cloned()
            .collect();

        for name in extraneous {
            let path = self.mods_dir.join(&name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    info!("sync: deleted {name}");
                    local.remove(&name);
                    events.send(SyncEvent::Deleted { name: name.clone() }).ok();
                    report.deleted.push(name);
                }
                Err(err) => {
                    let reason = io_err(&path, err).to_string();
                    warn!("sync: could not delete {name}: {reason}");
                    events
                        .send(SyncEvent::DeleteFailed {
                            name: name.clone(),
                            reason: reason.clone(),
                        })
                        .ok();
                    report.deletion_failures.push(DeletionFailure { name, reason });
                }
            }
        }
    }

    async fn verify_and_fetch(
        &self,
        manifest: &Manifest,
        local: &BTreeSet<String>,
        report: &mut SyncReport,
        events: &mpsc::UnboundedSender<SyncEvent>,
    ) -> Result<(), LauncherError> {
        if manifest.is_empty() {
            debug!("sync: manifest lists no mods");
            return Ok(());
        }
        let total = manifest.len();
        let mut completed = 0;
        // Built eagerly so the stream owns its futures and stays `Send`.
        let jobs: Vec<_> = manifest
            .files
            .iter()
            .map(|entry| {
                let present = local.contains(&entry.name);
                async move { (entry, self.sync_entry(entry, present, events).await) }
            })
            .collect();
        let mut pending = stream::iter(jobs).buffer_unordered(self.concurrency);

        while let Some((entry, result)) = pending.next().await {
            let action = result?;
            completed += 1;
            match action {
                EntryAction::Verified => report.verified.push(entry.name.clone()),
                EntryAction::Fetched => report.fetched.push(entry.name.clone()),
            }
            events
                .send(SyncEvent::EntryDone {
                    name: entry.name.clone(),
                    action,
                    completed,
                    total,
                })
                .ok();
        }
        Ok(())
    }

    async fn sync_entry(
        &self,
        entry: &ManifestEntry,
        present: bool,
        events: &mpsc::UnboundedSender<SyncEvent>,
    ) -> Result<EntryAction, LauncherError> {
        let dest = self.mods_dir.join(&entry.name);
        events
            .send(SyncEvent::Checking {
                name: entry.name.clone(),
            })
            .ok();

        if present {
            match hasher::sha256_file_async(dest.clone()).await {
                Ok(actual) if actual == entry.hash => {
                    debug!("sync: {} up to date", entry.name);
                    return Ok(EntryAction::Verified);
                }
                Ok(actual) => debug!(
                    "sync: {} is stale (have {actual}, want {})",
                    entry.name, entry.hash
                ),
                Err(err) => warn!("sync: unable to hash {}, re-fetching: {err}", entry.name),
            }
        }

        self.fetch_entry(entry, &dest, events).await?;
        Ok(EntryAction::Fetched)
    }

    /// Download into a sibling `.part` file, check the digest, then move it
    /// over the destination.
    async fn fetch_entry(
        &self,
        entry: &ManifestEntry,
        dest: &Path,
        events: &mpsc::UnboundedSender<SyncEvent>,
    ) -> Result<(), LauncherError> {
        let partial = self
            .mods_dir
            .join(format!("{}{PARTIAL_SUFFIX}", entry.name));
        info!("sync: downloading {} from {}", entry.name, entry.url);

        let result = self
            .network
            .download_to_path(&entry.url, &partial, |downloaded, total, speed| {
                events
                    .send(SyncEvent::Downloading {
                        name: entry.name.clone(),
                        downloaded,
                        total,
                        speed: speed.to_owned(),
                    })
                    .ok();
            })
            .await;

        let outcome = match result {
            Ok(downloaded) if downloaded.sha256 == entry.hash => tokio::fs::rename(&partial, dest)
                .await
                .map_err(|e| io_err(dest, e)),
            Ok(downloaded) => Err(LauncherError::Integrity {
                name: entry.name.clone(),
                expected: entry.hash.clone(),
                actual: downloaded.sha256,
            }),
            Err(err) => Err(err),
        };

        if outcome.is_err() {
            let _ = tokio::fs::remove_file(&partial).await;
        }
        outcome
    }

    fn transition(&mut self, phase: SyncPhase, events: &mpsc::UnboundedSender<SyncEvent>) {
        debug!("sync: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        events.send(SyncEvent::Phase(phase)).ok();
    }

    fn finish(
        &mut self,
        report: SyncReport,
        events: &mpsc::UnboundedSender<SyncEvent>,
    ) -> SyncReport {
        let phase = if report.outcome.is_ready() {
            SyncPhase::Ready
        } else {
            SyncPhase::Degraded
        };
        self.transition(phase, events);
        info!(
            "sync: finished {:?} (deleted {}, fetched {}, verified {})",
            phase,
            report.deleted.len(),
            report.fetched.len(),
            report.verified.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::SyncOutcome;
    use crate::test_support::{TestServer, sha256_hex, test_client, test_config};

    fn reconciler(server: &TestServer, mods_dir: &Path, concurrency: usize) -> Reconciler {
        let mut config = test_config(&server.manifest_url(), mods_dir);
        config.concurrency = concurrency;
        Reconciler::new(&config, test_client())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn progress(events: &[SyncEvent]) -> Vec<(usize, usize)> {
        events
            .iter()
            .filter_map(|event| match event {
                SyncEvent::EntryDone {
                    completed, total, ..
                } => Some((*completed, *total)),
                _ => None,
            })
            .collect()
    }

    fn managed_names(dir: &Path) -> BTreeSet<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().unwrap().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".jar"))
            .collect()
    }

    #[tokio::test]
    async fn deletes_unknown_skips_current_and_fetches_missing() {
        let server = TestServer::start().await;
        server.put_file("a.jar", b"mod a".to_vec());
        server.put_file("b.jar", b"mod b".to_vec());
        server.publish(&["a.jar", "b.jar"]);

        let tmp = tempfile::tempdir().unwrap();
        let mods = tmp.path().join("mods");
        std::fs::create_dir_all(&mods).unwrap();
        std::fs::write(mods.join("a.jar"), b"mod a").unwrap();
        std::fs::write(mods.join("c.jar"), b"unknown").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sync = reconciler(&server, &mods, 1);
        let report = sync.run(&tx).await;

        assert_eq!(report.outcome, SyncOutcome::Ready);
        assert_eq!(report.deleted, ["c.jar"]);
        assert_eq!(report.verified, ["a.jar"]);
        assert_eq!(report.fetched, ["b.jar"]);
        assert_eq!(server.hits("a.jar"), 0);
        assert_eq!(server.hits("b.jar"), 1);
        assert_eq!(sync.phase(), SyncPhase::Ready);

        let events = drain(&mut rx);
        assert_eq!(progress(&events), [(1, 2), (2, 2)]);
        assert_eq!(
            managed_names(&mods),
            BTreeSet::from(["a.jar".to_owned(), "b.jar".to_owned()])
        );
        assert_eq!(std::fs::read(mods.join("b.jar")).unwrap(), b"mod b");
    }

    #[tokio::test]
    async fn phases_follow_the_state_machine() {
        let server = TestServer::start().await;
        server.put_file("a.jar", b"mod a".to_vec());
        server.publish(&["a.jar"]);
        let tmp = tempfile::tempdir().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        reconciler(&server, tmp.path(), 1).run(&tx).await;

        let phases: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                SyncEvent::Phase(phase) => Some(phase),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            [
                SyncPhase::NotStarted,
                SyncPhase::Fetching,
                SyncPhase::Reconciling,
                SyncPhase::Ready
            ]
        );
    }

    #[tokio::test]
    async fn second_run_performs_no_fetches() {
        let server = TestServer::start().await;
        server.put_file("a.jar", b"mod a".to_vec());
        server.put_file("b.jar", b"mod b".to_vec());
        server.publish(&["a.jar", "b.jar"]);
        let tmp = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut sync = reconciler(&server, tmp.path(), 1);
        assert!(sync.run(&tx).await.outcome.is_ready());
        let second = sync.run(&tx).await;

        assert!(second.outcome.is_ready());
        assert!(second.fetched.is_empty());
        assert_eq!(second.verified.len(), 2);
        assert_eq!(server.hits("a.jar"), 1);
        assert_eq!(server.hits("b.jar"), 1);
    }

    #[tokio::test]
    async fn stale_file_is_replaced_not_deleted() {
        let server = TestServer::start().await;
        server.put_file("a.jar", b"fresh".to_vec());
        server.publish(&["a.jar"]);
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.jar"), b"stale").unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let report = reconciler(&server, tmp.path(), 1).run(&tx).await;

        assert!(report.outcome.is_ready());
        assert!(report.deleted.is_empty());
        assert_eq!(report.fetched, ["a.jar"]);
        assert_eq!(
            hasher::sha256_file(&tmp.path().join("a.jar")).unwrap(),
            sha256_hex(b"fresh")
        );
        assert!(!tmp.path().join("a.jar.part").exists());
    }

    #[tokio::test]
    async fn unreachable_manifest_degrades_without_touching_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("keep.jar"), b"local").unwrap();
        let config = test_config("http://127.0.0.1:1/manifest.json", tmp.path());
        let mut sync = Reconciler::new(&config, test_client());

        let (tx, _rx) = mpsc::unbounded_channel();
        let report = sync.run(&tx).await;

        assert!(matches!(report.outcome, SyncOutcome::Degraded(_)));
        assert!(tmp.path().join("keep.jar").exists());
        assert_eq!(sync.phase(), SyncPhase::Degraded);
    }

    #[tokio::test]
    async fn unsafe_manifest_names_degrade_before_deletion() {
        let server = TestServer::start().await;
        server.set_manifest(format!(
            r#"{{ "files": [ {{ "name": "../escape.jar", "url": "{}", "hash": "{}" }} ] }}"#,
            server.file_url("escape.jar"),
            sha256_hex(b"x")
        ));
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("keep.jar"), b"local").unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let report = reconciler(&server, tmp.path(), 1).run(&tx).await;

        assert!(matches!(report.outcome, SyncOutcome::Degraded(_)));
        assert!(tmp.path().join("keep.jar").exists());
    }

    #[tokio::test]
    async fn failed_download_stops_the_pass() {
        let server = TestServer::start().await;
        server.put_file("a.jar", b"mod a".to_vec());
        server.put_file("c.jar", b"mod c".to_vec());
        server.set_manifest(format!(
            r#"{{ "files": [
                {{ "name": "a.jar", "url": "{}", "hash": "{}" }},
                {{ "name": "b.jar", "url": "{}", "hash": "{}" }},
                {{ "name": "c.jar", "url": "{}", "hash": "{}" }}
            ] }}"#,
            server.file_url("a.jar"),
            sha256_hex(b"mod a"),
            server.file_url("b.jar"),
            sha256_hex(b"mod b"),
            server.file_url("c.jar"),
            sha256_hex(b"mod c"),
        ));
        let tmp = tempfile::tempdir().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = reconciler(&server, tmp.path(), 1).run(&tx).await;

        assert!(matches!(report.outcome, SyncOutcome::Degraded(_)));
        assert_eq!(report.fetched, ["a.jar"]);
        assert_eq!(server.hits("c.jar"), 0);
        assert!(!tmp.path().join("b.jar").exists());
        assert_eq!(progress(&drain(&mut rx)), [(1, 3)]);
    }

    #[tokio::test]
    async fn corrupted_download_is_rejected() {
        let server = TestServer::start().await;
        server.put_file("a.jar", b"tampered".to_vec());
        server.set_manifest(format!(
            r#"{{ "files": [ {{ "name": "a.jar", "url": "{}", "hash": "{}" }} ] }}"#,
            server.file_url("a.jar"),
            sha256_hex(b"genuine")
        ));
        let tmp = tempfile::tempdir().unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let report = reconciler(&server, tmp.path(), 1).run(&tx).await;

        assert!(matches!(report.outcome, SyncOutcome::Degraded(_)));
        assert!(!tmp.path().join("a.jar").exists());
        assert!(!tmp.path().join("a.jar.part").exists());
    }

    #[tokio::test]
    async fn unmanaged_files_and_directories_are_left_alone() {
        let server = TestServer::start().await;
        server.publish(&[]);
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("options.txt"), b"keep").unwrap();
        std::fs::create_dir_all(tmp.path().join("config.jar")).unwrap();
        std::fs::write(tmp.path().join("old.jar"), b"drop").unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let report = reconciler(&server, tmp.path(), 1).run(&tx).await;

        assert!(report.outcome.is_ready());
        assert_eq!(report.deleted, ["old.jar"]);
        assert!(tmp.path().join("options.txt").exists());
        assert!(tmp.path().join("config.jar").is_dir());
    }

    #[tokio::test]
    async fn creates_missing_mods_dir() {
        let server = TestServer::start().await;
        server.put_file("a.jar", b"mod a".to_vec());
        server.publish(&["a.jar"]);
        let tmp = tempfile::tempdir().unwrap();
        let mods = tmp.path().join("game").join("mods");

        let (tx, _rx) = mpsc::unbounded_channel();
        let report = reconciler(&server, &mods, 1).run(&tx).await;

        assert!(report.outcome.is_ready());
        assert!(mods.join("a.jar").is_file());
    }

    #[tokio::test]
    async fn concurrent_pass_converges_with_monotonic_progress() {
        let server = TestServer::start().await;
        let names: Vec<String> = (0..8).map(|i| format!("mod{i}.jar")).collect();
        for name in &names {
            server.put_file(name, name.repeat(100).into_bytes());
        }
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        server.publish(&refs);
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("mod3.jar"), b"stale").unwrap();
        std::fs::write(tmp.path().join("gone.jar"), b"gone").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = reconciler(&server, tmp.path(), 4).run(&tx).await;

        assert!(report.outcome.is_ready());
        let counts: Vec<usize> = progress(&drain(&mut rx)).into_iter().map(|(c, _)| c).collect();
        assert_eq!(counts, (1..=8).collect::<Vec<_>>());
        assert_eq!(
            managed_names(tmp.path()),
            names.iter().cloned().collect::<BTreeSet<_>>()
        );
        for name in &names {
            assert_eq!(
                hasher::sha256_file(&tmp.path().join(name)).unwrap(),
                sha256_hex(name.repeat(100).as_bytes())
            );
        }
    }

    #[tokio::test]
    async fn deletion_failure_does_not_stop_the_pass() {
        let server = TestServer::start().await;
        server.publish(&[]);
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("old.jar"), b"old").unwrap();
        let manifest = Manifest { files: Vec::new() };
        // "ghost.jar" was listed but vanished before removal.
        let mut local = BTreeSet::from(["ghost.jar".to_owned(), "old.jar".to_owned()]);
        let mut report = SyncReport::new();

        let (tx, mut rx) = mpsc::unbounded_channel();
        reconciler(&server, tmp.path(), 1)
            .delete_extraneous(&manifest, &mut local, &mut report, &tx)
            .await;

        let failed: Vec<_> = report
            .deletion_failures
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(failed, ["ghost.jar"]);
        assert_eq!(report.deleted, ["old.jar"]);
        assert!(!tmp.path().join("old.jar").exists());
        assert_eq!(local, BTreeSet::from(["ghost.jar".to_owned()]));

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            SyncEvent::DeleteFailed { name, .. } if name == "ghost.jar"
        )));
        assert!(events.contains(&SyncEvent::Deleted {
            name: "old.jar".into()
        }));
    }

    #[tokio::test]
    async fn deletion_failure_alone_degrades_the_run() {
        let server = TestServer::start().await;
        server.put_file("a.jar", b"mod a".to_vec());
        server.publish(&["a.jar"]);
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.jar"), b"mod a").unwrap();
        let manifest = Manifest {
            files: vec![ManifestEntry {
                name: "a.jar".into(),
                url: server.file_url("a.jar"),
                hash: sha256_hex(b"mod a"),
            }],
        };
        let local = BTreeSet::from(["a.jar".to_owned(), "ghost.jar".to_owned()]);

        let (tx, _rx) = mpsc::unbounded_channel();
        let report = reconciler(&server, tmp.path(), 1)
            .apply(&manifest, local, SyncReport::new(), &tx)
            .await;

        assert_eq!(report.verified, ["a.jar"]);
        assert!(report.fetched.is_empty());
        assert_eq!(report.deletion_failures.len(), 1);
        assert_eq!(
            report.outcome,
            SyncOutcome::Degraded("1 outdated mod(s) could not be removed".into())
        );
    }
}
