pub mod client;
pub mod http;
pub mod normalize;
pub mod protocol;

pub use client::{PollPolicy, RemoteJobClient};
pub use http::HttpTransport;

use async_trait::async_trait;

use crate::domain::error::RemoteError;
use crate::domain::job::RemoteAction;

/// フォームフィールド (順序を保持)
pub type FormFields = Vec<(String, String)>;

/// multipart で送るファイル本体
#[derive(Debug, Clone)]
pub struct FilePart {
    pub file_name: String,
    pub content: Vec<u8>,
}

/// リモートサービスへの送信路。本番は `HttpTransport`、テストではスクリプト化した実装を使う。
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// `action` に POST し、レスポンス本文を返す。
    ///
    /// `file` があれば multipart、なければ form-urlencoded で送る。
    async fn post(
        &self,
        action: RemoteAction,
        form: FormFields,
        file: Option<FilePart>,
    ) -> Result<String, RemoteError>;
}
