use serde::Serialize;

/// リモートサービスの HTTP アクション
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RemoteAction {
    Prepare,
    Upload,
    Merge,
    GetProgress,
    GetResult,
}

impl RemoteAction {
    /// ベース URL に続くパス要素
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Upload => "upload",
            Self::Merge => "merge",
            Self::GetProgress => "getProgress",
            Self::GetResult => "getResult",
        }
    }
}

impl std::fmt::Display for RemoteAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// リモートジョブ状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteJobStatus {
    Created,
    InProgress,
    Done,
    Failed,
}

impl RemoteJobStatus {
    /// getProgress の status コードを解釈する。
    ///
    /// -1 = エラー, 0 = 作成済み, 9 = 完了, それ以外は処理中。
    pub fn from_code(code: i64) -> Self {
        match code {
            -1 => Self::Failed,
            0 => Self::Created,
            9 => Self::Done,
            _ => Self::InProgress,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// リモートサービス側のジョブ
#[derive(Debug, Clone, Serialize)]
pub struct RemoteJob {
    pub task_id: String,
    pub status: RemoteJobStatus,
}

impl RemoteJob {
    pub fn new(task_id: String) -> Self {
        Self {
            task_id,
            status: RemoteJobStatus::Created,
        }
    }
}

/// フロント向けのジョブ照会結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobLookup {
    pub ready: bool,
    pub result: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(RemoteJobStatus::from_code(-1), RemoteJobStatus::Failed);
        assert_eq!(RemoteJobStatus::from_code(0), RemoteJobStatus::Created);
        assert_eq!(RemoteJobStatus::from_code(9), RemoteJobStatus::Done);
        assert_eq!(RemoteJobStatus::from_code(3), RemoteJobStatus::InProgress);
        assert_eq!(RemoteJobStatus::from_code(42), RemoteJobStatus::InProgress);
    }

    #[test]
    fn action_paths() {
        assert_eq!(RemoteAction::Prepare.as_str(), "prepare");
        assert_eq!(RemoteAction::GetProgress.to_string(), "getProgress");
        assert_eq!(RemoteAction::GetResult.to_string(), "getResult");
    }

    #[test]
    fn terminal_states() {
        assert!(RemoteJobStatus::Done.is_terminal());
        assert!(RemoteJobStatus::Failed.is_terminal());
        assert!(!RemoteJobStatus::Created.is_terminal());
        assert!(!RemoteJobStatus::InProgress.is_terminal());
    }

    #[test]
    fn status_serialization() {
        assert_eq!(
            serde_json::to_string(&RemoteJobStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }
}
