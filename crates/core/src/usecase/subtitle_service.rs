use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::error::{AppError, ErrorCode};
use crate::domain::subtitle::{concat, render_srt, SubtitleRecord};
use crate::infra::metrics::{Metrics, MetricsSummary, Phase};
use crate::infra::remote::RemoteJobClient;
use crate::usecase::job_registry::{CleanupAction, JobRegistry};

/// 分割済み音声セグメントから字幕を組み立てるサービス
pub struct SubtitleService {
    client: Arc<RemoteJobClient>,
    registry: Arc<JobRegistry>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
}

impl SubtitleService {
    pub fn new(client: Arc<RemoteJobClient>, registry: Arc<JobRegistry>) -> Self {
        Self {
            client,
            registry,
            metrics: Arc::new(Metrics::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    /// 実行中のバックグラウンドジョブをすべてキャンセルする
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    // ─── Transcription ──────────────────────────────────────────

    /// セグメント (パス → 開始オフセット秒) を順に文字起こしし、
    /// 0 から振り直した字幕レコードを返す。
    ///
    /// セグメントはオフセット昇順に処理する。途中で失敗したら残りは投入しない。
    pub async fn transcribe_segments(
        &self,
        segments: &HashMap<PathBuf, f64>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubtitleRecord>, AppError> {
        let ordered = order_segments(segments)?;

        self.metrics.inc_jobs_submitted();
        let job_start = Instant::now();

        let mut parts = Vec::with_capacity(ordered.len());
        for (path, base) in ordered {
            let seg_start = Instant::now();
            log::info!("Submitting segment {} (offset {:?})", path.display(), base);

            match self.client.submit_file(path, base, cancel).await {
                Ok(records) => {
                    self.metrics
                        .record_latency(Phase::Segment, seg_start.elapsed().as_millis() as u64);
                    log::debug!("Segment {} produced {} records", path.display(), records.len());
                    parts.push(records);
                }
                Err(e) => {
                    log::error!("Segment {} failed: {}", path.display(), e);
                    let err = AppError::from(e);
                    self.metrics.inc_error(err.code);
                    return Err(err);
                }
            }
        }

        let records = concat(parts);
        self.metrics.inc_jobs_succeeded();
        self.metrics
            .record_latency(Phase::Job, job_start.elapsed().as_millis() as u64);
        log::info!(
            "Transcribed {} segments into {} records",
            segments.len(),
            records.len()
        );
        Ok(records)
    }

    /// `transcribe_segments` の結果を SRT にする。字幕が 1 件もなければ `E_NO_SPEECH`。
    pub async fn transcribe_to_srt(
        &self,
        segments: &HashMap<PathBuf, f64>,
        cancel: &CancellationToken,
    ) -> Result<String, AppError> {
        let records = self.transcribe_segments(segments, cancel).await?;
        if records.is_empty() {
            self.metrics.inc_error(ErrorCode::NoSpeech);
            return Err(AppError::no_speech());
        }
        Ok(render_srt(&records))
    }

    // ─── Background ─────────────────────────────────────────────

    /// トークンを発行してレジストリに登録し、文字起こしをバックグラウンドで実行する。
    ///
    /// 完了時に SRT テキスト、失敗時に `AppError` の JSON を `done` で記録する。
    pub fn spawn_background(
        self: &Arc<Self>,
        segments: HashMap<PathBuf, f64>,
        cleanup: Option<CleanupAction>,
    ) -> (String, JoinHandle<()>) {
        let token = uuid::Uuid::new_v4().to_string();
        self.registry.add(token.clone(), cleanup);

        let service = Arc::clone(self);
        let job_token = token.clone();
        let cancel = self.shutdown.child_token();

        let handle = tokio::spawn(async move {
            let payload = match service.transcribe_to_srt(&segments, &cancel).await {
                Ok(srt) => srt,
                Err(e) => {
                    log::warn!("Background job {} failed: {}", job_token, e);
                    e.to_payload()
                }
            };
            service.registry.done(&job_token, payload);
        });

        log::info!("Background job {} started", token);
        (token, handle)
    }
}

/// 断片の時刻 (最大 u64 ミリ秒) を足しても溢れないオフセット上限
const MAX_SEGMENT_OFFSET: Duration = Duration::from_secs(u32::MAX as u64);

fn order_segments(
    segments: &HashMap<PathBuf, f64>,
) -> Result<Vec<(&PathBuf, Duration)>, AppError> {
    if segments.is_empty() {
        return Err(AppError::invalid_input("No audio segments given"));
    }

    let mut ordered = segments
        .iter()
        .map(|(path, offset)| {
            Duration::try_from_secs_f64(*offset)
                .ok()
                .filter(|base| *base <= MAX_SEGMENT_OFFSET)
                .map(|base| (path, base))
                .ok_or_else(|| {
                    AppError::invalid_input(format!(
                        "Invalid offset {} for segment {}",
                        offset,
                        path.display()
                    ))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    ordered.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    Ok(ordered)
}

/// 指定ファイルを削除する後片付け。既に無いファイルは無視する。
///
/// 1 つ失敗しても残りの削除は続け、最初のエラーを返す。
pub fn remove_files_cleanup(paths: Vec<PathBuf>) -> CleanupAction {
    Arc::new(move || {
        let mut first_err: Option<io::Error> = None;
        for path in &paths {
            match std::fs::remove_file(path) {
                Ok(()) => log::debug!("Removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    log::warn!("Failed to remove {}: {}", path.display(), e);
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    })
}
