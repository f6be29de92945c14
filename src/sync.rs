//! Optimistic persistence of layout edits.
//!
//! Local state changes first; [`SyncGate`] pushes whole-view snapshots to the
//! backend, either after a quiet period or right away, and keeps a ledger so
//! callers can tell what has and has not been stored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::backend::StoryBackend;
use crate::error::{Error, Result};
use crate::ir::{Edge, LayoutNode, StoryRecord, ViewKey};
use crate::session::{AdminSession, Credential};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveKind {
    Debounced,
    Immediate,
    /// Mobile writes: the stored edges are re-read and kept.
    PreservingEdges,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InFlight,
    Succeeded,
    /// A newer save replaced this one before it was sent.
    Superseded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRecord {
    pub id: u64,
    pub key: ViewKey,
    pub kind: SaveKind,
    pub status: SyncStatus,
    pub nodes: usize,
    pub edges: usize,
}

/// Whole-view payload of one save.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutSnapshot {
    pub key: ViewKey,
    pub nodes: Vec<LayoutNode>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Default)]
struct Shared {
    ledger: Mutex<Vec<SyncRecord>>,
    generation: AtomicU64,
    next_id: AtomicU64,
}

impl Shared {
    fn ledger(&self) -> MutexGuard<'_, Vec<SyncRecord>> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open(&self, snapshot: &LayoutSnapshot, kind: SaveKind, status: SyncStatus) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.ledger().push(SyncRecord {
            id,
            key: snapshot.key.clone(),
            kind,
            status,
            nodes: snapshot.nodes.len(),
            edges: snapshot.edges.len(),
        });
        id
    }

    fn set(&self, id: u64, status: SyncStatus) {
        if let Some(record) = self.ledger().iter_mut().find(|record| record.id == id) {
            record.status = status;
        }
    }

    /// Invalidate every debounced save still waiting.
    fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn send(
        &self,
        backend: &dyn StoryBackend,
        id: u64,
        snapshot: &LayoutSnapshot,
        credential: &Credential,
    ) -> Result<()> {
        self.set(id, SyncStatus::InFlight);
        match backend
            .save_layout(&snapshot.key, &snapshot.nodes, &snapshot.edges, credential)
            .await
        {
            Ok(()) => {
                self.set(id, SyncStatus::Succeeded);
                Ok(())
            }
            Err(err) => {
                log::error!("saving {} failed: {err}", snapshot.key);
                self.set(id, SyncStatus::Failed(err.to_string()));
                Err(err)
            }
        }
    }
}

#[derive(Clone)]
pub struct SyncGate {
    backend: Arc<dyn StoryBackend>,
    quiet: Duration,
    shared: Arc<Shared>,
}

impl SyncGate {
    pub fn new(backend: Arc<dyn StoryBackend>, quiet: Duration) -> Self {
        Self {
            backend,
            quiet,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn StoryBackend> {
        &self.backend
    }

    /// Runtime that debounced saves are spawned on.
    pub fn runtime() -> Result<Handle> {
        Handle::try_current().map_err(|_| Error::NotConfigured("tokio runtime"))
    }

    /// Queue a save that only goes out if nothing newer is scheduled within
    /// the quiet period. Outside a tokio runtime nothing is queued.
    pub fn schedule(&self, session: &AdminSession, snapshot: LayoutSnapshot) -> Result<JoinHandle<()>> {
        let credential = session.credential()?.clone();
        let runtime = Self::runtime()?;
        let id = self
            .shared
            .open(&snapshot, SaveKind::Debounced, SyncStatus::Pending);
        let generation = self.shared.bump();
        let shared = Arc::clone(&self.shared);
        let backend = Arc::clone(&self.backend);
        let quiet = self.quiet;

        Ok(runtime.spawn(async move {
            tokio::time::sleep(quiet).await;
            if shared.generation.load(Ordering::SeqCst) != generation {
                shared.set(id, SyncStatus::Superseded);
                return;
            }
            // failures stay on the ledger for the next prompt
            let _ = shared
                .send(backend.as_ref(), id, &snapshot, &credential)
                .await;
        }))
    }

    /// Save right away, superseding any pending debounced save.
    pub async fn save_now(&self, session: &AdminSession, snapshot: LayoutSnapshot) -> Result<()> {
        let credential = session.credential()?;
        self.shared.bump();
        let id = self
            .shared
            .open(&snapshot, SaveKind::Immediate, SyncStatus::Pending);
        self.shared
            .send(self.backend.as_ref(), id, &snapshot, credential)
            .await
    }

    /// Save node positions while keeping whatever edges are stored, falling
    /// back to the snapshot's edges for a view not saved before. Returns the
    /// edges that were written.
    pub async fn save_preserving_edges(
        &self,
        session: &AdminSession,
        mut snapshot: LayoutSnapshot,
    ) -> Result<Vec<Edge>> {
        let credential = session.credential()?;
        self.shared.bump();
        if let Some(stored) = self.backend.fetch_layout_edges(&snapshot.key).await? {
            snapshot.edges = stored;
        }
        let id = self
            .shared
            .open(&snapshot, SaveKind::PreservingEdges, SyncStatus::Pending);
        self.shared
            .send(self.backend.as_ref(), id, &snapshot, credential)
            .await?;
        Ok(snapshot.edges)
    }

    /// Write one master record; not debounced.
    pub async fn save_story(&self, session: &AdminSession, story: &StoryRecord) -> Result<()> {
        let credential = session.credential()?;
        story.validate()?;
        self.backend
            .upsert_story(story, credential)
            .await
            .inspect_err(|err| log::error!("saving story {} failed: {err}", story.id))
    }

    pub fn records(&self) -> Vec<SyncRecord> {
        self.shared.ledger().clone()
    }

    pub fn last_failure(&self) -> Option<SyncRecord> {
        self.shared
            .ledger()
            .iter()
            .rev()
            .find(|record| record.status != SyncStatus::Superseded)
            .filter(|record| matches!(record.status, SyncStatus::Failed(_)))
            .cloned()
    }

    /// Something is waiting, in flight, or the latest save failed.
    pub fn has_unsynced(&self) -> bool {
        let busy = self
            .shared
            .ledger()
            .iter()
            .any(|record| matches!(record.status, SyncStatus::Pending | SyncStatus::InFlight));
        busy || self.last_failure().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn snapshot(nodes: usize) -> LayoutSnapshot {
        LayoutSnapshot {
            key: ViewKey::season(1),
            nodes: (0..nodes)
                .map(|i| LayoutNode::new(format!("n{i}"), format!("s{i}"), 0.0, i as f32 * 80.0))
                .collect(),
            edges: vec![Edge::new("e1", "n0", "n1")],
        }
    }

    fn admin() -> AdminSession {
        AdminSession::with_credential(Credential::new("pw"))
    }

    #[tokio::test]
    async fn saving_without_credential_never_calls_backend() {
        let backend = Arc::new(MemoryBackend::new("pw"));
        let gate = SyncGate::new(backend.clone(), Duration::from_millis(2000));
        let viewer = AdminSession::new();

        assert!(matches!(gate.save_now(&viewer, snapshot(2)).await, Err(Error::NotAdmin)));
        assert!(matches!(gate.schedule(&viewer, snapshot(2)), Err(Error::NotAdmin)));
        assert!(matches!(
            gate.save_preserving_edges(&viewer, snapshot(2)).await,
            Err(Error::NotAdmin)
        ));
        assert_eq!(backend.calls(), 0);
        assert!(gate.records().is_empty());
    }

    #[test]
    fn scheduling_outside_a_runtime_is_an_error() {
        let backend = Arc::new(MemoryBackend::new("pw"));
        let gate = SyncGate::new(backend.clone(), Duration::from_millis(2000));

        let result = gate.schedule(&admin(), snapshot(2));
        assert!(matches!(result, Err(Error::NotConfigured(_))));
        assert!(gate.records().is_empty());
        assert!(!gate.has_unsynced());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_saves_coalesce() {
        let backend = Arc::new(MemoryBackend::new("pw"));
        let gate = SyncGate::new(backend.clone(), Duration::from_millis(2000));
        let session = admin();

        let first = gate.schedule(&session, snapshot(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let second = gate.schedule(&session, snapshot(2)).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let third = gate.schedule(&session, snapshot(3)).unwrap();
        assert!(gate.has_unsynced());

        first.await.unwrap();
        second.await.unwrap();
        third.await.unwrap();

        let saves = backend.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].1.len(), 3);
        let statuses: Vec<SyncStatus> = gate.records().into_iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![SyncStatus::Superseded, SyncStatus::Superseded, SyncStatus::Succeeded]
        );
        assert!(!gate.has_unsynced());
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_save_supersedes_pending() {
        let backend = Arc::new(MemoryBackend::new("pw"));
        let gate = SyncGate::new(backend.clone(), Duration::from_millis(2000));
        let session = admin();

        let pending = gate.schedule(&session, snapshot(1)).unwrap();
        gate.save_now(&session, snapshot(4)).await.unwrap();
        pending.await.unwrap();

        let saves = backend.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].1.len(), 4);
    }

    #[tokio::test]
    async fn failures_are_recorded() {
        let backend = Arc::new(MemoryBackend::new("pw"));
        backend.set_failing(true);
        let gate = SyncGate::new(backend.clone(), Duration::from_millis(10));
        let session = admin();

        assert!(gate.save_now(&session, snapshot(2)).await.is_err());
        let failure = gate.last_failure().unwrap();
        assert!(matches!(failure.status, SyncStatus::Failed(_)));
        assert!(gate.has_unsynced());

        backend.set_failing(false);
        gate.save_now(&session, snapshot(2)).await.unwrap();
        assert!(gate.last_failure().is_none());
    }

    #[tokio::test]
    async fn mobile_save_keeps_stored_edges() {
        let backend = Arc::new(MemoryBackend::new("pw"));
        let gate = SyncGate::new(backend.clone(), Duration::from_millis(10));
        let session = admin();

        let mut desktop = snapshot(3);
        desktop.edges.push(Edge::new("e2", "n1", "n2"));
        gate.save_now(&session, desktop).await.unwrap();

        let mobile = snapshot(3);
        let kept = gate.save_preserving_edges(&session, mobile).await.unwrap();
        assert_eq!(kept.len(), 2);
        let stored = backend.saves().pop().unwrap();
        assert_eq!(stored.2.len(), 2);

        let fresh = LayoutSnapshot {
            key: ViewKey::season(9),
            ..snapshot(1)
        };
        let written = gate.save_preserving_edges(&session, fresh).await.unwrap();
        assert_eq!(written.len(), 1);
    }
}
