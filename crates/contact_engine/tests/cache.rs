use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use contact_core::{ReasonCode, StageKind, Verdict, VerificationResult};
use contact_engine::{CacheStats, CacheStore, UtcClock};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const HOUR: Duration = Duration::from_secs(60 * 60);

struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())),
        }
    }

    fn clock(&self) -> UtcClock {
        let now = self.now.clone();
        Arc::new(move || *now.lock().unwrap())
    }

    fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

fn result(email: &str, verdict: Verdict, reason: ReasonCode) -> VerificationResult {
    VerificationResult::new(
        email,
        StageKind::Smtp,
        verdict,
        reason,
        Vec::new(),
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    )
}

#[tokio::test]
async fn entries_survive_reopen_keyed_by_normalized_email() {
    let temp = TempDir::new().unwrap();
    let valid = result("info@example.test", Verdict::Valid, ReasonCode::MailboxAccepted);
    {
        let cache = CacheStore::open(temp.path()).unwrap();
        cache.put(" Info@Example.TEST ", valid.clone(), HOUR).await.unwrap();
    }
    assert_eq!(
        std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
            .count(),
        1
    );

    let reopened = CacheStore::open(temp.path()).unwrap();
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.get("info@example.test"), Some(valid));
    assert_eq!(reopened.get("other@example.test"), None);
    assert_eq!(
        reopened.stats(),
        CacheStats {
            hits: 1,
            misses: 1,
            expired: 0,
            writes: 0,
        }
    );
}

#[tokio::test]
async fn expired_entries_are_absent() {
    let manual = ManualClock::new();
    let cache = CacheStore::in_memory_with_clock(manual.clock());
    let unknown = result("slow@example.test", Verdict::Unknown, ReasonCode::SmtpDeferred);
    cache.put("slow@example.test", unknown.clone(), HOUR).await.unwrap();

    manual.advance(HOUR);
    // Expiry is strict: exactly at `expires_at` the entry still counts.
    assert_eq!(cache.get("slow@example.test"), Some(unknown));

    manual.advance(Duration::from_secs(1));
    assert_eq!(cache.get("slow@example.test"), None);
    assert!(cache.is_empty());
    assert_eq!(cache.stats().expired, 1);
}

#[tokio::test]
async fn purge_removes_expired_files() {
    let temp = TempDir::new().unwrap();
    let manual = ManualClock::new();
    let cache = CacheStore::open_with_clock(temp.path(), manual.clock()).unwrap();
    cache
        .put(
            "short@example.test",
            result("short@example.test", Verdict::Unknown, ReasonCode::TimeoutAtSmtp),
            HOUR,
        )
        .await
        .unwrap();
    cache
        .put(
            "long@example.test",
            result("long@example.test", Verdict::Valid, ReasonCode::MailboxAccepted),
            HOUR * 24,
        )
        .await
        .unwrap();

    manual.advance(HOUR * 2);
    assert_eq!(cache.purge_expired().unwrap(), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);

    let reopened = CacheStore::open_with_clock(temp.path(), manual.clock()).unwrap();
    assert!(reopened.get("long@example.test").is_some());
}

#[tokio::test]
async fn reopening_drops_entries_that_expired_on_disk() {
    let temp = TempDir::new().unwrap();
    let manual = ManualClock::new();
    {
        let cache = CacheStore::open_with_clock(temp.path(), manual.clock()).unwrap();
        cache
            .put(
                "gone@example.test",
                result("gone@example.test", Verdict::Invalid, ReasonCode::NoMx),
                HOUR,
            )
            .await
            .unwrap();
    }
    manual.advance(HOUR * 3);

    let reopened = CacheStore::open_with_clock(temp.path(), manual.clock()).unwrap();
    assert!(reopened.is_empty());
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn unreadable_cache_files_are_set_aside() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("broken.json"), b"[1, 2").unwrap();

    let cache = CacheStore::open(temp.path()).unwrap();
    assert!(cache.is_empty());
    assert!(temp.path().join("broken.json.bak").is_file());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_lookups_share_one_computation() {
    let cache = Arc::new(CacheStore::in_memory());
    let computations = Arc::new(AtomicUsize::new(0));

    let callers: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            let computations = computations.clone();
            tokio::spawn(async move {
                cache
                    .get_or_verify(
                        "shared@example.test",
                        |_| HOUR,
                        || async {
                            computations.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            result(
                                "shared@example.test",
                                Verdict::Valid,
                                ReasonCode::MailboxAccepted,
                            )
                        },
                    )
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut verdicts = Vec::new();
    for caller in callers {
        verdicts.push(caller.await.unwrap().verdict);
    }

    assert_eq!(computations.load(Ordering::SeqCst), 1);
    assert_eq!(verdicts, vec![Verdict::Valid; 16]);
    let stats = cache.stats();
    assert_eq!(stats.writes, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_keys_compute_independently() {
    let cache = Arc::new(CacheStore::in_memory());
    let computations = Arc::new(AtomicUsize::new(0));

    let callers: Vec<_> = ["a@example.test", "b@example.test", "c@example.test"]
        .into_iter()
        .map(|email| {
            let cache = cache.clone();
            let computations = computations.clone();
            tokio::spawn(async move {
                cache
                    .get_or_verify(
                        email,
                        |_| HOUR,
                        || async {
                            computations.fetch_add(1, Ordering::SeqCst);
                            result(email, Verdict::Valid, ReasonCode::MailboxAccepted)
                        },
                    )
                    .await
                    .unwrap()
            })
        })
        .collect();
    for caller in callers {
        caller.await.unwrap();
    }

    assert_eq!(computations.load(Ordering::SeqCst), 3);
    assert_eq!(cache.len(), 3);
}

async fn exploding_verification() -> VerificationResult {
    panic!("resolver exploded")
}

#[tokio::test]
async fn panicking_computation_releases_its_key() {
    let cache = Arc::new(CacheStore::in_memory());
    let crashed = tokio::spawn({
        let cache = cache.clone();
        async move {
            cache
                .get_or_verify("boom@example.test", |_| HOUR, exploding_verification)
                .await
        }
    })
    .await;
    assert!(crashed.unwrap_err().is_panic());
    assert_eq!(cache.busy_keys(), 0);

    let valid = result("boom@example.test", Verdict::Valid, ReasonCode::MailboxAccepted);
    let stored = cache
        .get_or_verify("boom@example.test", |_| HOUR, || async { valid.clone() })
        .await
        .unwrap();
    assert_eq!(stored, valid);
    assert_eq!(cache.busy_keys(), 0);
}
