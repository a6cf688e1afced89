use crate::{
    CachedLineStore, ClaimCoordinator, ClaimOutcome, Error, FileLineStore, GrantedSet, Identifier,
    LineStore, Result,
};
use futures::{FutureExt, future::join_all};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tempfile::TempDir;

/// In-memory log with switchable failures. The `panic_*` switches fire once.
#[derive(Clone, Default)]
struct FlakyStore {
    log: Arc<Mutex<Vec<Identifier>>>,
    fail_load: Arc<AtomicBool>,
    fail_append: Arc<AtomicBool>,
    panic_load: Arc<AtomicBool>,
    panic_append: Arc<AtomicBool>,
}

impl FlakyStore {
    fn seeded(raw: &[&str]) -> Self {
        let store = Self::default();
        store
            .log
            .lock()
            .extend(raw.iter().map(|s| Identifier::parse(s).unwrap()));
        store
    }

    fn records(&self) -> Vec<String> {
        self.log.lock().iter().map(|id| id.to_string()).collect()
    }
}

fn injected() -> Error {
    Error::io("injected", std::io::Error::other("injected failure"))
}

impl LineStore for FlakyStore {
    async fn load(&self) -> Result<GrantedSet> {
        if self.panic_load.swap(false, Ordering::SeqCst) {
            panic!("load blew up");
        }
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(injected());
        }
        Ok(Arc::new(self.log.lock().iter().cloned().collect()))
    }

    async fn append_unique(&self, ids: &[Identifier]) -> Result<usize> {
        if self.panic_append.swap(false, Ordering::SeqCst) {
            panic!("append blew up");
        }
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(injected());
        }
        let mut seen = HashSet::new();
        let unique: Vec<_> = ids.iter().filter(|id| seen.insert(*id)).cloned().collect();
        let written = unique.len();
        self.log.lock().extend(unique);
        Ok(written)
    }

    async fn ensure_initialized(&self) -> Result<()> {
        Ok(())
    }

    async fn read_log(&self) -> Result<String> {
        Ok(self.records().iter().map(|r| format!("{r}\n")).collect())
    }
}

fn file_store(dir: &TempDir) -> FileLineStore {
    FileLineStore::new(dir.path().join("lines.txt"))
}

async fn initialized_file_coordinator(dir: &TempDir) -> ClaimCoordinator {
    let store = file_store(dir);
    store.ensure_initialized().await.unwrap();
    ClaimCoordinator::spawn(store)
}

fn assert_partition(outcome: &ClaimOutcome, claimed: &[&str], rejected: &[&str]) {
    assert_eq!(outcome.claimed_strs(), claimed);
    assert_eq!(outcome.rejected_strs(), rejected);
}

#[tokio::test]
async fn intra_batch_duplicate_is_denied() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = initialized_file_coordinator(&dir).await;

    let outcome = coordinator.claim(["a", "b", "a"], None).await.unwrap();

    assert_partition(&outcome, &["a", "b"], &["a"]);
    assert_eq!(std::fs::read_to_string(dir.path().join("lines.txt")).unwrap(), "a\nb\n");
}

#[tokio::test]
async fn previously_granted_is_denied() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("lines.txt"), "a\n").unwrap();
    let coordinator = initialized_file_coordinator(&dir).await;

    let outcome = coordinator.claim(["a", "c"], None).await.unwrap();

    assert_partition(&outcome, &["c"], &["a"]);
}

#[tokio::test]
async fn limited_candidates_stay_claimable() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = initialized_file_coordinator(&dir).await;

    let first = coordinator.claim(["x", "y", "z"], Some(1)).await.unwrap();
    assert_partition(&first, &["x"], &["y", "z"]);

    let second = coordinator.claim(["y"], None).await.unwrap();
    assert_partition(&second, &["y"], &[]);
}

#[tokio::test]
async fn candidates_are_trimmed_and_blanks_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = initialized_file_coordinator(&dir).await;

    let outcome = coordinator
        .claim([" a ", "", "   ", "a", "\tb\n"], None)
        .await
        .unwrap();

    assert_partition(&outcome, &["a", "b"], &["a"]);
}

#[tokio::test]
async fn empty_batch_is_an_empty_outcome() {
    let store = FlakyStore::default();
    let coordinator = ClaimCoordinator::spawn(store.clone());

    let outcome = coordinator.claim(Vec::<String>::new(), None).await.unwrap();

    assert!(outcome.is_empty());
    assert!(store.records().is_empty());
}

#[tokio::test]
async fn grants_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();

    let first = initialized_file_coordinator(&dir).await;
    assert_partition(&first.claim(["a", "b"], None).await.unwrap(), &["a", "b"], &[]);
    first.shutdown().await.unwrap();

    let second = initialized_file_coordinator(&dir).await;
    let outcome = second.claim(["b", "a", "c"], None).await.unwrap();
    assert_partition(&outcome, &["c"], &["b", "a"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_claims_of_one_identifier_grant_it_once() {
    const CALLERS: usize = 64;
    let dir = tempfile::tempdir().unwrap();
    let coordinator = initialized_file_coordinator(&dir).await;

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.claim(["shared"], None).await })
        })
        .collect();

    let outcomes: Vec<ClaimOutcome> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let granted = outcomes.iter().filter(|o| !o.claimed.is_empty()).count();
    let denied = outcomes.iter().filter(|o| !o.rejected.is_empty()).count();
    assert_eq!(granted, 1);
    assert_eq!(denied, CALLERS - 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn overlapping_batches_never_double_grant() {
    const CALLERS: usize = 32;
    let dir = tempfile::tempdir().unwrap();
    let store = CachedLineStore::new(file_store(&dir));
    store.ensure_initialized().await.unwrap();
    let coordinator = ClaimCoordinator::spawn(store);

    let handles: Vec<_> = (0..CALLERS)
        .map(|caller| {
            let coordinator = coordinator.clone();
            // Each caller overlaps with its neighbours on half its batch.
            let batch: Vec<String> = (caller * 4..caller * 4 + 8)
                .map(|n| format!("line-{n}"))
                .collect();
            let limit = if caller % 3 == 0 { Some(3) } else { None };
            tokio::spawn(async move { (batch.len(), limit, coordinator.claim(batch, limit).await) })
        })
        .collect();

    let mut grants: HashMap<String, usize> = HashMap::new();
    for joined in join_all(handles).await {
        let (submitted, limit, result) = joined.unwrap();
        let outcome = result.unwrap();
        assert_eq!(outcome.len(), submitted);
        if let Some(limit) = limit {
            assert!(outcome.claimed.len() <= limit);
        }
        for id in outcome.claimed {
            *grants.entry(id.into_inner()).or_default() += 1;
        }
    }

    assert!(grants.values().all(|&n| n == 1));

    let on_disk = file_store(&dir).load().await.unwrap();
    let granted: HashSet<Identifier> = grants
        .keys()
        .map(|s| Identifier::parse(s).unwrap())
        .collect();
    assert_eq!(*on_disk, granted);
}

#[tokio::test]
async fn failed_append_rejects_everything_and_changes_nothing() {
    let store = FlakyStore::seeded(&["old"]);
    store.fail_append.store(true, Ordering::SeqCst);
    let coordinator = ClaimCoordinator::spawn(store.clone());

    let err = coordinator.claim(["p", "q", "r"], None).await.unwrap_err();

    assert!(err.source.is_io());
    let rejected: Vec<&str> = err.rejected.iter().map(Identifier::as_str).collect();
    assert_eq!(rejected, ["p", "q", "r"]);
    assert_eq!(store.records(), ["old"]);
}

#[tokio::test]
async fn failed_load_rejects_everything() {
    let store = FlakyStore::default();
    store.fail_load.store(true, Ordering::SeqCst);
    let coordinator = ClaimCoordinator::spawn(store.clone());

    let err = coordinator.claim(["a", " ", "a"], None).await.unwrap_err();

    assert!(err.source.is_io());
    assert_eq!(err.rejected.len(), 2);
    assert!(store.records().is_empty());
}

#[tokio::test]
async fn worker_keeps_serving_after_a_failed_cycle() {
    let store = FlakyStore::default();
    let coordinator = ClaimCoordinator::spawn(store.clone());

    store.fail_append.store(true, Ordering::SeqCst);
    assert!(coordinator.claim(["a", "b"], None).await.is_err());

    store.fail_append.store(false, Ordering::SeqCst);
    let retried = coordinator.claim(["a", "b"], None).await.unwrap();
    assert_partition(&retried, &["a", "b"], &[]);
    assert_eq!(store.records(), ["a", "b"]);
}

#[tokio::test]
async fn worker_survives_a_panicking_load() {
    let store = FlakyStore::default();
    store.panic_load.store(true, Ordering::SeqCst);
    let coordinator = ClaimCoordinator::spawn(store.clone());

    let err = coordinator.claim(["a", "b"], None).await.unwrap_err();
    assert!(matches!(err.source, Error::CyclePanicked { ref message } if message == "load blew up"));
    let rejected: Vec<&str> = err.rejected.iter().map(Identifier::as_str).collect();
    assert_eq!(rejected, ["a", "b"]);
    assert!(store.records().is_empty());

    assert!(!coordinator.is_closed());
    let outcome = coordinator.claim(["b"], None).await.unwrap();
    assert_partition(&outcome, &["b"], &[]);
}

#[tokio::test]
async fn worker_survives_a_panicking_ingest() {
    let store = FlakyStore::default();
    store.panic_append.store(true, Ordering::SeqCst);
    let coordinator = ClaimCoordinator::spawn(store.clone());

    assert!(matches!(
        coordinator.ingest(["a"]).await,
        Err(Error::CyclePanicked { .. })
    ));

    assert_eq!(coordinator.ingest(["a"]).await.unwrap(), 1);
    assert_eq!(store.records(), ["a"]);
}

#[tokio::test]
async fn dropped_caller_still_records_its_grant() {
    let store = FlakyStore::default();
    let coordinator = ClaimCoordinator::spawn(store.clone());

    // Poll the claim once so it is enqueued, then drop it.
    {
        let claim = coordinator.claim(["gone"], None);
        tokio::pin!(claim);
        assert!(claim.as_mut().now_or_never().is_none());
    }

    // FIFO: this claim runs after the abandoned one.
    let outcome = coordinator.claim(["gone"], None).await.unwrap();
    assert_partition(&outcome, &[], &["gone"]);
    assert_eq!(store.records(), ["gone"]);
}

#[tokio::test]
async fn ingest_counts_only_new_identifiers() {
    let store = FlakyStore::seeded(&["a"]);
    let coordinator = ClaimCoordinator::spawn(store.clone());

    let added = coordinator
        .ingest(["a", " b ", "", "c", "b"])
        .await
        .unwrap();

    assert_eq!(added, 2);
    assert_eq!(store.records(), ["a", "b", "c"]);

    let outcome = coordinator.claim(["b", "d"], None).await.unwrap();
    assert_partition(&outcome, &["d"], &["b"]);
}

#[tokio::test]
async fn ingest_of_blanks_is_a_noop() {
    let store = FlakyStore::default();
    store.fail_load.store(true, Ordering::SeqCst);
    let coordinator = ClaimCoordinator::spawn(store);

    assert_eq!(coordinator.ingest(["", "  "]).await.unwrap(), 0);
}

#[tokio::test]
async fn ingest_failure_is_reported() {
    let store = FlakyStore::default();
    store.fail_append.store(true, Ordering::SeqCst);
    let coordinator = ClaimCoordinator::spawn(store);

    assert!(coordinator.ingest(["a"]).await.unwrap_err().is_io());
}

#[tokio::test]
async fn shutdown_drains_queue_then_rejects() {
    let store = FlakyStore::default();
    let coordinator = ClaimCoordinator::spawn(store.clone());

    let queued = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.claim(["early"], None).await })
    };
    tokio::task::yield_now().await;

    coordinator.shutdown().await.unwrap();
    // A second request is a no-op.
    coordinator.shutdown().await.unwrap();

    // The claim was enqueued before the shutdown message, so it ran.
    let early = queued.await.unwrap().unwrap();
    assert_partition(&early, &["early"], &[]);
    assert_eq!(store.records(), ["early"]);

    assert!(coordinator.is_closed());
    let err = coordinator.claim(["late", "later"], None).await.unwrap_err();
    assert!(matches!(err.source, Error::ServiceShutdown));
    assert_eq!(err.rejected.len(), 2);
    assert!(matches!(
        coordinator.ingest(["late"]).await,
        Err(Error::ServiceShutdown)
    ));
    assert!(!store.records().contains(&"late".to_string()));
}
