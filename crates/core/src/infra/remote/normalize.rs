//! JSON 文字列を内包する JSON の正規化。
//!
//! リモートサービスは `data` などのフィールドに JSON をさらに文字列として
//! 埋め込んで返す。ここでは文字列値を片端から JSON として解釈し直し、
//! 成功したものだけを置き換える。失敗した文字列はそのまま残す。

use serde_json::Value;

/// 値ツリーを再帰的に正規化する。
pub fn normalize(value: Value) -> Value {
    match value {
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(parsed) => normalize(parsed),
            Err(_) => Value::String(raw),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, normalize(value)))
                .collect(),
        ),
        other => other,
    }
}
