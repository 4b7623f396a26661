use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::domain::job::JobLookup;
use crate::domain::settings::RegistrySettings;
use crate::infra::clock::Clock;

const MIN_REAP_INTERVAL: Duration = Duration::from_millis(1);

/// 期限切れ時に実行する後片付け (一時ファイル削除など)
pub type CleanupAction = Arc<dyn Fn() -> std::io::Result<()> + Send + Sync>;

/// レジストリのエントリ。`result` が空なら未完了。
#[derive(Clone)]
pub struct JobEntry {
    pub token: String,
    pub deadline: DateTime<Utc>,
    pub result: String,
    cleanup: Option<CleanupAction>,
}

impl JobEntry {
    pub fn is_ready(&self) -> bool {
        !self.result.is_empty()
    }

    pub fn has_cleanup(&self) -> bool {
        self.cleanup.is_some()
    }
}

impl std::fmt::Debug for JobEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEntry")
            .field("token", &self.token)
            .field("deadline", &self.deadline)
            .field("result_len", &self.result.len())
            .field("has_cleanup", &self.has_cleanup())
            .finish()
    }
}

/// 1 回の刈り取り結果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub evicted: usize,
    pub cleanup_failures: usize,
}

struct RegistryInner {
    entries: Mutex<HashMap<String, JobEntry>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    /// 手動呼び出しとリーパーが同時に刈り取らないようにする
    reaping: tokio::sync::Mutex<()>,
}

struct ReaperHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// ローカルで発行したトークンを TTL 付きで保持するレジストリ。
///
/// `start` でバックグラウンドのリーパーを起動し、期限切れのエントリを
/// 完了状態に関係なく削除する。削除前に後片付けを実行する。
pub struct JobRegistry {
    inner: Arc<RegistryInner>,
    reap_interval: Duration,
    reaper: Mutex<Option<ReaperHandle>>,
}

impl JobRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_settings(&RegistrySettings::default(), clock)
    }

    /// `reap_interval_ms` が 0 の場合は 1ms に切り上げる。
    pub fn with_settings(settings: &RegistrySettings, clock: Arc<dyn Clock>) -> Self {
        let mut reap_interval = settings.reap_interval();
        if reap_interval.is_zero() {
            log::warn!(
                "Reap interval of 0 is not allowed, using {:?}",
                MIN_REAP_INTERVAL
            );
            reap_interval = MIN_REAP_INTERVAL;
        }

        Self {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(HashMap::new()),
                clock,
                ttl: settings.ttl(),
                reaping: tokio::sync::Mutex::new(()),
            }),
            reap_interval,
            reaper: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// トークンを登録する。同じトークンがあれば上書きする。
    pub fn add(&self, token: impl Into<String>, cleanup: Option<CleanupAction>) {
        let token = token.into();
        let ttl = chrono::Duration::milliseconds(self.inner.ttl.as_millis() as i64);
        let entry = JobEntry {
            token: token.clone(),
            deadline: self.inner.clock.now() + ttl,
            result: String::new(),
            cleanup,
        };

        let mut entries = self.inner.entries.lock();
        if entries.insert(token.clone(), entry).is_some() {
            log::warn!("Job {} registered twice, previous entry replaced", token);
        }
    }

    /// 結果を記録する。期限と後片付けはそのまま残す。
    ///
    /// 未知のトークンは警告のみで何もしない。戻り値は記録できたかどうか。
    pub fn done(&self, token: &str, result: impl Into<String>) -> bool {
        let mut entries = self.inner.entries.lock();
        match entries.get_mut(token) {
            Some(entry) => {
                entry.result = result.into();
                log::info!("Job {} done ({} bytes)", token, entry.result.len());
                true
            }
            None => {
                log::warn!("Job {} does not exist, result dropped", token);
                false
            }
        }
    }

    /// エントリのスナップショットを返す。
    pub fn load(&self, token: &str) -> Option<JobEntry> {
        self.inner.entries.lock().get(token).cloned()
    }

    /// フロント向けの照会
    pub fn lookup(&self, token: &str) -> Option<JobLookup> {
        self.inner.entries.lock().get(token).map(|e| JobLookup {
            ready: e.is_ready(),
            result: e.result.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 期限切れエントリを刈り取る。
    pub async fn reap_expired(&self) -> ReapReport {
        self.inner.reap_expired().await
    }

    // ─── リーパー ────────────────────────────────────────────────

    /// リーパーを起動する。二度目以降の呼び出しは無視する。
    pub fn start(&self) {
        let mut reaper = self.reaper.lock();
        if reaper.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            log::warn!("Job registry reaper already running");
            return;
        }

        let cancel = CancellationToken::new();
        let inner = self.inner.clone();
        let interval = self.reap_interval;
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        inner.reap_expired().await;
                    }
                }
            }
            log::debug!("Job registry reaper stopped");
        });

        log::info!(
            "Job registry reaper started (ttl {:?}, every {:?})",
            self.inner.ttl,
            interval
        );
        *reaper = Some(ReaperHandle { cancel, handle });
    }

    /// リーパーのタスクが生きているか
    pub fn is_running(&self) -> bool {
        self.reaper
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// リーパーを停止し、終了を待つ。
    pub async fn stop(&self) {
        let reaper = self.reaper.lock().take();
        if let Some(ReaperHandle { cancel, handle }) = reaper {
            cancel.cancel();
            if let Err(e) = handle.await {
                log::error!("Job registry reaper ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for JobRegistry {
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.get_mut().take() {
            reaper.cancel.cancel();
        }
    }
}

impl RegistryInner {
    /// 期限切れを記録 → ロック解放 → 後片付け → 再ロックして削除。
    ///
    /// 後片付けの間に同じトークンが再登録された場合は期限が変わるので削除しない。
    async fn reap_expired(&self) -> ReapReport {
        let _guard = self.reaping.lock().await;
        let now = self.clock.now();

        let expired: Vec<(String, DateTime<Utc>, Option<CleanupAction>)> = {
            let entries = self.entries.lock();
            entries
                .values()
                .filter(|e| e.deadline <= now)
                .map(|e| (e.token.clone(), e.deadline, e.cleanup.clone()))
                .collect()
        };

        if expired.is_empty() {
            return ReapReport::default();
        }

        let mut report = ReapReport::default();
        for (token, _, cleanup) in &expired {
            let Some(cleanup) = cleanup.clone() else {
                continue;
            };
            match tokio::task::spawn_blocking(move || cleanup()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.cleanup_failures += 1;
                    log::error!("Cleanup for job {} failed: {}", token, e);
                }
                Err(e) => {
                    report.cleanup_failures += 1;
                    log::error!("Cleanup for job {} panicked: {}", token, e);
                }
            }
        }

        let mut entries = self.entries.lock();
        for (token, deadline, _) in &expired {
            if entries.get(token).map(|e| e.deadline) == Some(*deadline) {
                entries.remove(token);
                report.evicted += 1;
            }
        }

        log::debug!(
            "Reaped {} expired jobs, {} still tracked: {:?}",
            report.evicted,
            entries.len(),
            entries.keys().collect::<Vec<_>>()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HOUR: Duration = Duration::from_secs(3600);

    fn registry() -> (JobRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::from_unix_seconds(1_700_000_000));
        (JobRegistry::new(clock.clone()), clock)
    }

    fn counting_cleanup(counter: &Arc<AtomicUsize>) -> CleanupAction {
        let counter = counter.clone();
        Arc::new(move || -> std::io::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_add_and_load() {
        let (reg, clock) = registry();
        reg.add("t1", None);

        let entry = reg.load("t1").unwrap();
        assert_eq!(entry.token, "t1");
        assert!(entry.result.is_empty());
        assert!(!entry.is_ready());
        assert_eq!(entry.deadline, clock.now() + chrono::Duration::hours(1));
        assert_eq!(reg.ttl(), HOUR);
    }

    #[tokio::test]
    async fn test_load_missing() {
        let (reg, _) = registry();
        assert!(reg.load("nope").is_none());
        assert!(reg.lookup("nope").is_none());
    }

    #[tokio::test]
    async fn test_done_preserves_deadline_and_cleanup() {
        let (reg, clock) = registry();
        let counter = Arc::new(AtomicUsize::new(0));
        reg.add("t1", Some(counting_cleanup(&counter)));
        let before = reg.load("t1").unwrap();

        clock.advance(Duration::from_secs(600));
        assert!(reg.done("t1", "1\n00:00:01,000 --> 00:00:02,000\nhi\n\n"));

        let after = reg.load("t1").unwrap();
        assert_eq!(after.deadline, before.deadline);
        assert!(after.has_cleanup());
        assert!(after.is_ready());
        assert_eq!(
            reg.lookup("t1"),
            Some(JobLookup {
                ready: true,
                result: "1\n00:00:01,000 --> 00:00:02,000\nhi\n\n".into(),
            })
        );
    }

    #[tokio::test]
    async fn test_done_unknown_token_is_noop() {
        let (reg, _) = registry();
        reg.add("known", None);

        assert!(!reg.done("unknown", "result"));
        assert_eq!(reg.len(), 1);
        assert!(reg.load("unknown").is_none());
        assert!(!reg.load("known").unwrap().is_ready());
    }

    #[tokio::test]
    async fn test_add_overwrites() {
        let (reg, clock) = registry();
        reg.add("t1", None);
        reg.done("t1", "old");
        clock.advance(Duration::from_secs(10));
        reg.add("t1", None);

        let entry = reg.load("t1").unwrap();
        assert!(entry.result.is_empty());
        assert_eq!(entry.deadline, clock.now() + chrono::Duration::hours(1));
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn test_not_reaped_before_deadline() {
        let (reg, clock) = registry();
        let counter = Arc::new(AtomicUsize::new(0));
        reg.add("t1", Some(counting_cleanup(&counter)));

        clock.advance(HOUR - Duration::from_secs(1));
        let report = reg.reap_expired().await;

        assert_eq!(report, ReapReport::default());
        assert!(reg.load("t1").is_some());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reaped_at_deadline() {
        let (reg, clock) = registry();
        let counter = Arc::new(AtomicUsize::new(0));
        reg.add("t1", Some(counting_cleanup(&counter)));
        reg.add("t2", None);

        clock.advance(HOUR);
        let report = reg.reap_expired().await;

        assert_eq!(report.evicted, 2);
        assert_eq!(report.cleanup_failures, 0);
        assert!(reg.is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // 二度目は何もしない
        assert_eq!(reg.reap_expired().await, ReapReport::default());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_completed_entry_still_reaped() {
        let (reg, clock) = registry();
        let counter = Arc::new(AtomicUsize::new(0));
        reg.add("t1", Some(counting_cleanup(&counter)));

        clock.advance(HOUR - Duration::from_millis(1));
        reg.done("t1", "finished");
        clock.advance(Duration::from_millis(1));

        reg.reap_expired().await;
        assert!(reg.load("t1").is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_only_expired_entries_reaped() {
        let (reg, clock) = registry();
        reg.add("old", None);
        clock.advance(Duration::from_secs(1800));
        reg.add("new", None);
        clock.advance(Duration::from_secs(1800));

        let report = reg.reap_expired().await;
        assert_eq!(report.evicted, 1);
        assert!(reg.load("old").is_none());
        assert!(reg.load("new").is_some());
    }

    #[tokio::test]
    async fn test_cleanup_failures_are_isolated() {
        let (reg, clock) = registry();
        let counter = Arc::new(AtomicUsize::new(0));
        reg.add(
            "fails",
            Some(Arc::new(|| -> std::io::Result<()> {
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))
            })),
        );
        reg.add(
            "panics",
            Some(Arc::new(|| -> std::io::Result<()> { panic!("cleanup exploded") })),
        );
        reg.add("ok", Some(counting_cleanup(&counter)));

        clock.advance(HOUR);
        let report = reg.reap_expired().await;

        assert_eq!(report.evicted, 3);
        assert_eq!(report.cleanup_failures, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn test_readded_during_cleanup_survives() {
        let clock = Arc::new(ManualClock::from_unix_seconds(1_700_000_000));
        let reg = Arc::new(JobRegistry::new(clock.clone()));

        let reg_in_cleanup = Arc::downgrade(&reg);
        let clock_in_cleanup = clock.clone();
        reg.add(
            "t1",
            Some(Arc::new(move || -> std::io::Result<()> {
                if let Some(reg) = reg_in_cleanup.upgrade() {
                    clock_in_cleanup.advance(Duration::from_secs(1));
                    reg.add("t1", None);
                }
                Ok(())
            })),
        );

        clock.advance(HOUR);
        let report = reg.reap_expired().await;

        assert_eq!(report.evicted, 0);
        let entry = reg.load("t1").unwrap();
        assert!(!entry.has_cleanup());
        assert!(entry.deadline > clock.now());
    }

    #[tokio::test]
    async fn test_reaper_loop_evicts_expired() {
        let clock = Arc::new(ManualClock::from_unix_seconds(1_700_000_000));
        let settings = RegistrySettings {
            ttl_secs: 60,
            reap_interval_ms: 10,
        };
        let reg = JobRegistry::with_settings(&settings, clock.clone());
        let counter = Arc::new(AtomicUsize::new(0));

        reg.start();
        assert!(reg.is_running());
        reg.add("t1", Some(counting_cleanup(&counter)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(reg.load("t1").is_some());

        clock.advance(Duration::from_secs(60));
        for _ in 0..200 {
            if reg.load("t1").is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(reg.load("t1").is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        reg.stop().await;
        assert!(!reg.is_running());
    }

    #[tokio::test]
    async fn test_zero_reap_interval_is_clamped() {
        let clock = Arc::new(ManualClock::from_unix_seconds(1_700_000_000));
        let settings = RegistrySettings {
            ttl_secs: 0,
            reap_interval_ms: 0,
        };
        let reg = JobRegistry::with_settings(&settings, clock);
        assert_eq!(reg.reap_interval, MIN_REAP_INTERVAL);

        reg.start();
        reg.add("t0", None);
        for _ in 0..200 {
            if reg.load("t0").is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(reg.load("t0").is_none());
        assert!(reg.is_running());
        reg.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let (reg, _) = registry();
        reg.start();
        reg.start();
        assert!(reg.is_running());
        reg.stop().await;
        assert!(!reg.is_running());
        // 停止後の stop も安全
        reg.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let (reg, _) = registry();
        let reg = Arc::new(reg);
        let mut handles = vec![];
        for i in 0..16 {
            let reg = reg.clone();
            handles.push(tokio::spawn(async move {
                let token = format!("t{i}");
                reg.add(token.clone(), None);
                reg.done(&token, format!("r{i}"));
                reg.load(&token).map(|e| e.result)
            }));
        }
        for (i, h) in handles.into_iter().enumerate() {
            assert_eq!(h.await.unwrap(), Some(format!("r{i}")));
        }
        assert_eq!(reg.len(), 16);
    }
}
