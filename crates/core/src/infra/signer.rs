use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha1::Sha1;

use crate::domain::settings::Credentials;
use crate::infra::clock::Clock;

/// 1 リクエスト分の署名情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequestContext {
    /// UNIX 秒
    pub timestamp: i64,
    /// base64 署名 (`signa`)
    pub signature: String,
}

impl SignedRequestContext {
    /// 全リクエスト共通のフォームフィールド
    pub fn form_fields(&self, app_id: &str) -> Vec<(String, String)> {
        vec![
            ("app_id".into(), app_id.to_string()),
            ("signa".into(), self.signature.clone()),
            ("ts".into(), self.timestamp.to_string()),
        ]
    }
}

/// `base64(HMAC-SHA1(secret, hex(MD5(app_id + ts))))` を計算する。
pub fn sign(app_id: &str, secret_key: &str, timestamp: i64) -> String {
    let base = format!("{app_id}{timestamp}");
    let digest = format!("{:x}", Md5::digest(base.as_bytes()));

    let mut mac = Hmac::<Sha1>::new_from_slice(secret_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(digest.as_bytes());

    STANDARD.encode(mac.finalize().into_bytes())
}

/// リクエスト署名器。タイムスタンプは `Clock` から秒精度で取得する。
pub struct Signer {
    credentials: Credentials,
    clock: Arc<dyn Clock>,
}

impl Signer {
    pub fn new(credentials: Credentials, clock: Arc<dyn Clock>) -> Self {
        Self { credentials, clock }
    }

    pub fn app_id(&self) -> &str {
        &self.credentials.app_id
    }

    /// 現在時刻で新しい署名を作る。署名は時刻を含むため毎回呼ぶこと。
    pub fn sign_now(&self) -> SignedRequestContext {
        let timestamp = self.clock.unix_seconds();
        SignedRequestContext {
            timestamp,
            signature: sign(
                &self.credentials.app_id,
                self.credentials.secret_key(),
                timestamp,
            ),
        }
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}
