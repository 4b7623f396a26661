use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::protocol::{ApiResponse, FIRST_SLICE_ID};
use super::{FilePart, FormFields, HttpTransport, RemoteTransport};
use crate::domain::error::RemoteError;
use crate::domain::job::{RemoteAction, RemoteJob, RemoteJobStatus};
use crate::domain::settings::{PollSettings, Settings};
use crate::domain::subtitle::{compose, SubtitleRecord, TimedFragment};
use crate::infra::clock::{Clock, Sleeper, TokioSleeper};
use crate::infra::signer::Signer;

/// getProgress のポーリング方針。固定間隔で、指数バックオフはしない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            interval: Duration::from_secs(1),
        }
    }
}

impl From<&PollSettings> for PollPolicy {
    fn from(s: &PollSettings) -> Self {
        Self {
            max_attempts: s.max_attempts,
            interval: Duration::from_millis(s.interval_ms),
        }
    }
}

/// prepare → upload → merge → getProgress → getResult を実行するクライアント。
///
/// 構築後は不変なので、複数のファイルを並行して投入してよい。
pub struct RemoteJobClient {
    transport: Arc<dyn RemoteTransport>,
    signer: Signer,
    sleeper: Arc<dyn Sleeper>,
    poll: PollPolicy,
    prepare_params: BTreeMap<String, String>,
}

impl RemoteJobClient {
    pub fn new(transport: Arc<dyn RemoteTransport>, signer: Signer) -> Self {
        Self {
            transport,
            signer,
            sleeper: Arc::new(TokioSleeper),
            poll: PollPolicy::default(),
            prepare_params: BTreeMap::new(),
        }
    }

    /// 設定から HTTP クライアントを組み立てる。
    pub fn from_settings(
        settings: &Settings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, reqwest::Error> {
        let transport = HttpTransport::new(settings.base_url.clone(), settings.request_timeout())?;
        let signer = Signer::new(settings.credentials(), clock);
        Ok(Self::new(Arc::new(transport), signer)
            .with_poll_policy(PollPolicy::from(&settings.poll))
            .with_prepare_params(settings.prepare_params.clone()))
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_prepare_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.prepare_params = params;
        self
    }

    /// 毎回新しい署名を付けて送信し、レスポンスをデコードする。
    async fn call(
        &self,
        action: RemoteAction,
        fields: FormFields,
        file: Option<FilePart>,
    ) -> Result<ApiResponse, RemoteError> {
        let mut form = self.signer.sign_now().form_fields(self.signer.app_id());
        form.extend(fields);

        let body = self.transport.post(action, form, file).await?;
        let response = ApiResponse::decode(action, &body)?;
        if response.ok != 0 {
            log::warn!(
                "{} returned ok={} err_no={} failed={:?}",
                action,
                response.ok,
                response.err_no,
                response.failed
            );
        }
        response.into_success(action)
    }

    // ─── 各フェーズ ──────────────────────────────────────────────

    /// タスクを作成する。空の task_id は以降のフェーズに進めないのでエラーにする。
    pub async fn prepare(&self, file_name: &str, file_len: u64) -> Result<RemoteJob, RemoteError> {
        let mut fields: FormFields = vec![
            ("file_len".into(), file_len.to_string()),
            ("file_name".into(), file_name.to_string()),
            ("slice_num".into(), "1".into()),
        ];
        fields.extend(
            self.prepare_params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let response = self.call(RemoteAction::Prepare, fields, None).await?;
        let task_id = response.task_id().ok_or_else(|| {
            RemoteError::protocol(RemoteAction::Prepare, "response carries no task id")
        })?;

        log::info!("Prepared remote job {} for {} ({} bytes)", task_id, file_name, file_len);
        Ok(RemoteJob::new(task_id))
    }

    /// ファイル全体を 1 スライスとして送る。大きなファイルの分割送信は未対応。
    pub async fn upload(
        &self,
        job: &RemoteJob,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<(), RemoteError> {
        let fields: FormFields = vec![
            ("task_id".into(), job.task_id.clone()),
            ("slice_id".into(), FIRST_SLICE_ID.into()),
        ];
        let file = FilePart {
            file_name: file_name.to_string(),
            content,
        };
        self.call(RemoteAction::Upload, fields, Some(file)).await?;
        log::debug!("Uploaded slice {} for {}", FIRST_SLICE_ID, job.task_id);
        Ok(())
    }

    pub async fn merge(&self, job: &RemoteJob) -> Result<(), RemoteError> {
        self.call(RemoteAction::Merge, task_fields(job), None).await?;
        log::debug!("Merged slices for {}", job.task_id);
        Ok(())
    }

    /// getProgress を 1 回だけ呼び、status コードと説明を返す。
    pub async fn progress(&self, job: &RemoteJob) -> Result<(i64, String), RemoteError> {
        self.call(RemoteAction::GetProgress, task_fields(job), None)
            .await?
            .progress()
    }

    /// 完了 (status 9) までポーリングする。戻り値は試行回数。
    ///
    /// status -1 は即時失敗。試行回数を使い切ったら `JobTimedOut`。
    /// キャンセルは各試行の前と待機中に確認する。
    pub async fn wait_for_completion(
        &self,
        job: &mut RemoteJob,
        cancel: &CancellationToken,
    ) -> Result<u32, RemoteError> {
        let mut remaining = self.poll.max_attempts;
        let mut attempts = 0;

        while remaining > 0 {
            if cancel.is_cancelled() {
                return Err(RemoteError::Cancelled {
                    task_id: job.task_id.clone(),
                });
            }
            remaining -= 1;
            attempts += 1;

            let (code, desc) = self.progress(job).await?;
            job.status = RemoteJobStatus::from_code(code);
            log::debug!(
                "Poll {}/{} for {}: status={} ({})",
                attempts,
                self.poll.max_attempts,
                job.task_id,
                code,
                desc
            );

            match job.status {
                RemoteJobStatus::Done => return Ok(attempts),
                RemoteJobStatus::Failed => {
                    log::error!("Remote job {} failed: {}", job.task_id, desc);
                    return Err(RemoteError::JobFailed {
                        task_id: job.task_id.clone(),
                        detail: desc,
                    });
                }
                RemoteJobStatus::Created | RemoteJobStatus::InProgress => {}
            }

            if remaining == 0 {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RemoteError::Cancelled {
                        task_id: job.task_id.clone(),
                    });
                }
                _ = self.sleeper.sleep(self.poll.interval) => {}
            }
        }

        log::warn!(
            "Remote job {} still unfinished after {} polls",
            job.task_id,
            attempts
        );
        Err(RemoteError::JobTimedOut {
            task_id: job.task_id.clone(),
            attempts,
        })
    }

    pub async fn fetch_result(&self, job: &RemoteJob) -> Result<Vec<TimedFragment>, RemoteError> {
        let fragments = self
            .call(RemoteAction::GetResult, task_fields(job), None)
            .await?
            .fragments()?;
        log::info!("Fetched {} fragments for {}", fragments.len(), job.task_id);
        Ok(fragments)
    }

    // ─── 一括実行 ────────────────────────────────────────────────

    /// 全フェーズを順に実行し、断片リストを返す。
    pub async fn submit_bytes(
        &self,
        file_name: &str,
        content: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<Vec<TimedFragment>, RemoteError> {
        let mut job = self.prepare(file_name, content.len() as u64).await?;
        self.upload(&job, file_name, content).await?;
        self.merge(&job).await?;
        self.wait_for_completion(&mut job, cancel).await?;
        self.fetch_result(&job).await
    }

    /// ファイルを投入し、`base` を起点にした字幕レコードを返す。
    pub async fn submit_file(
        &self,
        path: &Path,
        base: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubtitleRecord>, RemoteError> {
        let content = tokio::fs::read(path).await.map_err(|e| {
            RemoteError::transport(
                RemoteAction::Prepare,
                format!("failed to read {}: {e}", path.display()),
            )
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let fragments = self.submit_bytes(&file_name, content, cancel).await?;
        Ok(compose(&fragments, base))
    }
}

fn task_fields(job: &RemoteJob) -> FormFields {
    vec![("task_id".into(), job.task_id.clone())]
}
