use serde::Serialize;

use crate::domain::job::RemoteAction;
use crate::domain::settings::SettingsError;

// ─── RemoteError ─────────────────────────────────────────────────

/// リモート文字起こしサービスとのやり取りで発生するエラー。
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// 通信失敗 (DNS/接続/IO/HTTPステータス)。この層ではリトライしない。
    #[error("Transport error during {action}: {detail}")]
    Transport { action: RemoteAction, detail: String },
    /// レスポンスの形が想定外
    #[error("Unexpected {action} response: {detail}")]
    Protocol { action: RemoteAction, detail: String },
    /// `ok` が 0 以外
    #[error("{action} rejected by remote service (err_no {code}): {message}")]
    Rejected {
        action: RemoteAction,
        code: i64,
        message: String,
    },
    #[error("Remote job {task_id} failed: {detail}")]
    JobFailed { task_id: String, detail: String },
    #[error("Remote job {task_id} did not finish after {attempts} polls")]
    JobTimedOut { task_id: String, attempts: u32 },
    #[error("Remote job {task_id} was cancelled")]
    Cancelled { task_id: String },
}

impl RemoteError {
    pub fn transport(action: RemoteAction, detail: impl Into<String>) -> Self {
        Self::Transport {
            action,
            detail: detail.into(),
        }
    }

    pub fn protocol(action: RemoteAction, detail: impl Into<String>) -> Self {
        Self::Protocol {
            action,
            detail: detail.into(),
        }
    }

    /// 失敗したリモートジョブの task_id (判明している場合)。
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::JobFailed { task_id, .. }
            | Self::JobTimedOut { task_id, .. }
            | Self::Cancelled { task_id } => Some(task_id),
            _ => None,
        }
    }
}

// ─── AppError ────────────────────────────────────────────────────

/// アプリケーション共通エラーコード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "E_TRANSPORT")]
    Transport,
    #[serde(rename = "E_PROTOCOL")]
    Protocol,
    #[serde(rename = "E_REJECTED")]
    Rejected,
    #[serde(rename = "E_JOB_FAILED")]
    JobFailed,
    #[serde(rename = "E_TIMEOUT")]
    Timeout,
    #[serde(rename = "E_CANCELED")]
    Canceled,
    #[serde(rename = "E_NO_SPEECH")]
    NoSpeech,
    #[serde(rename = "E_INVALID_INPUT")]
    InvalidInput,
    #[serde(rename = "E_CONFIG")]
    Config,
    #[serde(rename = "E_IO")]
    Io,
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "E_TRANSPORT",
            Self::Protocol => "E_PROTOCOL",
            Self::Rejected => "E_REJECTED",
            Self::JobFailed => "E_JOB_FAILED",
            Self::Timeout => "E_TIMEOUT",
            Self::Canceled => "E_CANCELED",
            Self::NoSpeech => "E_NO_SPEECH",
            Self::InvalidInput => "E_INVALID_INPUT",
            Self::Config => "E_CONFIG",
            Self::Io => "E_IO",
            Self::Internal => "E_INTERNAL",
        }
    }
}

/// アプリケーションエラー（レジストリ結果ペイロード兼用）
#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    pub recoverable: bool,
}

impl AppError {
    pub fn no_speech() -> Self {
        Self {
            code: ErrorCode::NoSpeech,
            message: "No speech detected".into(),
            recoverable: true,
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: msg.into(),
            recoverable: false,
        }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Io,
            message: msg.into(),
            recoverable: false,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Internal,
            message: msg.into(),
            recoverable: false,
        }
    }

    /// レジストリに格納する JSON 文字列へ変換する。
    pub fn to_payload(&self) -> String {
        serde_json::json!({ "error": self }).to_string()
    }
}

impl From<RemoteError> for AppError {
    fn from(err: RemoteError) -> Self {
        let (code, recoverable) = match &err {
            RemoteError::Transport { .. } => (ErrorCode::Transport, true),
            RemoteError::Protocol { .. } => (ErrorCode::Protocol, false),
            RemoteError::Rejected { .. } => (ErrorCode::Rejected, false),
            RemoteError::JobFailed { .. } => (ErrorCode::JobFailed, true),
            RemoteError::JobTimedOut { .. } => (ErrorCode::Timeout, true),
            RemoteError::Cancelled { .. } => (ErrorCode::Canceled, true),
        };
        Self {
            code,
            message: err.to_string(),
            recoverable,
        }
    }
}

impl From<SettingsError> for AppError {
    fn from(err: SettingsError) -> Self {
        Self {
            code: ErrorCode::Config,
            message: err.to_string(),
            recoverable: false,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}
