use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─── TimedFragment ───────────────────────────────────────────────

/// リモートサービスが返す時間付きテキスト断片。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedFragment {
    /// 開始オフセット (ミリ秒)
    pub start_ms: u64,
    /// 終了オフセット (ミリ秒)
    pub end_ms: u64,
    /// 認識テキスト
    pub text: String,
}

impl TimedFragment {
    pub fn new(start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            text: text.into(),
        }
    }
}

// ─── SubtitleRecord ──────────────────────────────────────────────

/// 字幕レコード。`index` は 0 始まりで連続する。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleRecord {
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
    pub content: String,
}

/// ミリ秒を秒 + 端数に分けて Duration に変換し、`base` を加算する。
///
/// `Duration::MAX` を超える場合は `Duration::MAX` に飽和する。
pub fn millis_to_duration(ms: u64, base: Duration) -> Duration {
    base.saturating_add(Duration::from_secs(ms / 1000))
        .saturating_add(Duration::from_millis(ms % 1000))
}

/// 断片リストを入力順のまま字幕レコードへ変換する。
///
/// タイムスタンプでの並べ替えは行わない。`base` はセグメント開始位置で、
/// 分割された音声を一本のタイムラインに戻すために使う。
pub fn compose(fragments: &[TimedFragment], base: Duration) -> Vec<SubtitleRecord> {
    fragments
        .iter()
        .enumerate()
        .map(|(index, fragment)| SubtitleRecord {
            index,
            start: millis_to_duration(fragment.start_ms, base),
            end: millis_to_duration(fragment.end_ms, base),
            content: fragment.text.clone(),
        })
        .collect()
}

/// 複数セグメントの結果を連結し、index を 0 から振り直す。
pub fn concat(parts: Vec<Vec<SubtitleRecord>>) -> Vec<SubtitleRecord> {
    parts
        .into_iter()
        .flatten()
        .enumerate()
        .map(|(index, record)| SubtitleRecord { index, ..record })
        .collect()
}

// ─── SRT ─────────────────────────────────────────────────────────

fn srt_timestamp(d: Duration) -> String {
    let total_ms = d.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

/// SRT 形式で出力する。キュー番号は 1 始まり。
pub fn render_srt(records: &[SubtitleRecord]) -> String {
    let mut out = String::new();
    for record in records {
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            record.index + 1,
            srt_timestamp(record.start),
            srt_timestamp(record.end),
            record.content
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_saturates_on_huge_base() {
        let base = Duration::try_from_secs_f64(1.844_674_407_370_954_9e19).unwrap();
        assert_eq!(millis_to_duration(5_000_000, base), Duration::MAX);
        assert_eq!(millis_to_duration(u64::MAX, Duration::MAX), Duration::MAX);
    }

    #[test]
    fn millis_zero() {
        assert_eq!(millis_to_duration(0, Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn millis_with_fraction() {
        assert_eq!(
            millis_to_duration(1500, Duration::ZERO),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn millis_with_base_offset() {
        assert_eq!(
            millis_to_duration(61_000, Duration::from_secs(5)),
            Duration::from_secs(66)
        );
    }

    #[test]
    fn compose_preserves_input_order() {
        let fragments = vec![
            TimedFragment::new(1000, 2000, "a"),
            TimedFragment::new(3000, 4000, "b"),
        ];
        let records = compose(&fragments, Duration::ZERO);
        assert_eq!(
            records,
            vec![
                SubtitleRecord {
                    index: 0,
                    start: Duration::from_secs(1),
                    end: Duration::from_secs(2),
                    content: "a".into(),
                },
                SubtitleRecord {
                    index: 1,
                    start: Duration::from_secs(3),
                    end: Duration::from_secs(4),
                    content: "b".into(),
                },
            ]
        );
    }

    #[test]
    fn compose_does_not_sort_by_timestamp() {
        let fragments = vec![
            TimedFragment::new(5000, 6000, "late"),
            TimedFragment::new(0, 1000, "early"),
        ];
        let records = compose(&fragments, Duration::ZERO);
        assert_eq!(records[0].content, "late");
        assert_eq!(records[0].index, 0);
        assert_eq!(records[1].content, "early");
        assert_eq!(records[1].index, 1);
    }

    #[test]
    fn compose_empty() {
        assert!(compose(&[], Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn concat_reindexes_contiguously() {
        let first = compose(&[TimedFragment::new(0, 500, "x")], Duration::ZERO);
        let second = compose(
            &[
                TimedFragment::new(0, 500, "y"),
                TimedFragment::new(500, 900, "z"),
            ],
            Duration::from_secs(30),
        );
        let all = concat(vec![first, second]);
        let indexes: Vec<usize> = all.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(all[1].start, Duration::from_secs(30));
        assert_eq!(all[2].end, Duration::from_millis(30_900));
    }

    #[test]
    fn srt_format() {
        let records = compose(
            &[
                TimedFragment::new(1000, 2500, "hello"),
                TimedFragment::new(3_723_004, 3_724_000, "world"),
            ],
            Duration::ZERO,
        );
        let srt = render_srt(&records);
        assert_eq!(
            srt,
            "1\n00:00:01,000 --> 00:00:02,500\nhello\n\n\
             2\n01:02:03,004 --> 01:02:04,000\nworld\n\n"
        );
    }
}
