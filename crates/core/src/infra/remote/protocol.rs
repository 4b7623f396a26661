use serde_json::Value;

use crate::domain::error::RemoteError;
use crate::domain::job::RemoteAction;
use crate::domain::subtitle::TimedFragment;

use super::normalize::normalize;

/// 先頭スライスの ID。アップロードは常に 1 スライスで行う。
pub const FIRST_SLICE_ID: &str = "aaaaaaaaaa";

/// 全アクション共通のレスポンス `{"ok": .., "err_no": .., "failed": .., "data": ..}`
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub ok: i64,
    pub err_no: i64,
    pub failed: Option<String>,
    /// 正規化済みの `data`
    pub data: Value,
    /// 正規化前の `data`
    pub raw_data: Value,
}

impl ApiResponse {
    /// 本文をデコードする。`ok` の値はここでは判定しない。
    pub fn decode(action: RemoteAction, body: &str) -> Result<Self, RemoteError> {
        let raw: Value = serde_json::from_str(body).map_err(|e| {
            RemoteError::protocol(
                action,
                format!("body is not JSON: {e}. Raw: {}", truncate(body, 200)),
            )
        })?;
        let raw_data = raw.get("data").cloned().unwrap_or(Value::Null);
        let normalized = normalize(raw);

        let obj = normalized
            .as_object()
            .ok_or_else(|| RemoteError::protocol(action, "body is not a JSON object"))?;

        let ok = obj
            .get("ok")
            .and_then(Value::as_i64)
            .ok_or_else(|| RemoteError::protocol(action, "missing integer field `ok`"))?;
        let err_no = obj.get("err_no").and_then(Value::as_i64).unwrap_or(0);
        let failed = obj.get("failed").and_then(|v| match v {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        });
        let data = obj.get("data").cloned().unwrap_or(Value::Null);

        Ok(Self {
            ok,
            err_no,
            failed,
            data,
            raw_data,
        })
    }

    /// `ok != 0` を `Rejected` に変換する。
    pub fn into_success(self, action: RemoteAction) -> Result<Self, RemoteError> {
        if self.ok == 0 {
            return Ok(self);
        }
        Err(RemoteError::Rejected {
            action,
            code: if self.err_no != 0 { self.err_no } else { self.ok },
            message: self.failed.unwrap_or_default(),
        })
    }

    /// prepare の `data` から task_id を取り出す。
    ///
    /// 数字だけの ID が正規化で数値に化けないよう、正規化前の値を優先する。
    pub fn task_id(&self) -> Option<String> {
        let id = match (&self.raw_data, &self.data) {
            (Value::String(s), _) => s.trim().to_string(),
            (_, Value::Object(map)) => map
                .get("task_id")
                .map(scalar_text)
                .unwrap_or_default(),
            (_, other) => scalar_text(other),
        };
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }

    /// 正規化前の `data` を 1 段だけ解いた断片リスト
    fn raw_items(&self) -> Option<Vec<Value>> {
        match &self.raw_data {
            Value::String(s) => match serde_json::from_str::<Value>(s).ok()? {
                Value::Array(items) => Some(items),
                _ => None,
            },
            Value::Array(items) => Some(items.clone()),
            _ => None,
        }
    }

    /// getProgress の `data.status` と `data.desc`
    pub fn progress(&self) -> Result<(i64, String), RemoteError> {
        let status = self
            .data
            .get("status")
            .and_then(|v| match v {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .ok_or_else(|| {
                RemoteError::protocol(
                    RemoteAction::GetProgress,
                    format!("missing status in {}", truncate(&self.data.to_string(), 200)),
                )
            })?;
        let desc = self.data.get("desc").map(scalar_text).unwrap_or_default();
        Ok((status, desc))
    }

    /// getResult の `data` を断片リストとして読む。
    pub fn fragments(&self) -> Result<Vec<TimedFragment>, RemoteError> {
        let action = RemoteAction::GetResult;
        let items = match &self.data {
            Value::Null => return Ok(Vec::new()),
            Value::String(s) if s.trim().is_empty() => return Ok(Vec::new()),
            Value::Array(items) => items,
            other => {
                return Err(RemoteError::protocol(
                    action,
                    format!("data is not a list: {}", truncate(&other.to_string(), 200)),
                ))
            }
        };

        let raw_items = self.raw_items();
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let start_ms = millis_field(item, "bg").ok_or_else(|| {
                    RemoteError::protocol(action, format!("fragment {i} has no `bg`"))
                })?;
                let end_ms = millis_field(item, "ed").ok_or_else(|| {
                    RemoteError::protocol(action, format!("fragment {i} has no `ed`"))
                })?;
                // onebest は正規化前の文字列をそのまま使う
                let text = raw_items
                    .as_ref()
                    .and_then(|raw| raw.get(i))
                    .and_then(|raw| raw.get("onebest"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| item.get("onebest").map(scalar_text).unwrap_or_default());
                Ok(TimedFragment {
                    start_ms,
                    end_ms,
                    text,
                })
            })
            .collect()
    }
}

/// `"1540"` / `1540` / `1540.0` をミリ秒として読む。負値は 0 に丸める。
fn millis_field(item: &Value, key: &str) -> Option<u64> {
    match item.get(key)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|v| v.max(0) as u64))
            .or_else(|| n.as_f64().map(|v| v.max(0.0) as u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|v| v.max(0.0) as u64))
        }
        _ => None,
    }
}

fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
