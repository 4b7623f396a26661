use parking_lot::Mutex;
use serde::Serialize;

use crate::domain::error::ErrorCode;

/// 文字起こしジョブのローカル集計
#[derive(Default)]
pub struct Metrics {
    state: Mutex<MetricsState>,
}

#[derive(Debug, Default)]
struct MetricsState {
    jobs_submitted: u64,
    jobs_succeeded: u64,
    errors: ErrorCounts,
    segment: PhaseLatency,
    job: PhaseLatency,
}

/// 計測区間ごとの累計
#[derive(Debug, Default, Clone, Copy)]
struct PhaseLatency {
    count: u64,
    total_ms: u64,
}

impl PhaseLatency {
    fn record(&mut self, ms: u64) {
        self.count += 1;
        self.total_ms = self.total_ms.saturating_add(ms);
    }

    fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total_ms as f64 / self.count as f64)
    }
}

/// 計測区間
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// 1 セグメントの投入から結果取得まで
    Segment,
    /// 全セグメントの処理
    Job,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub jobs_submitted: u64,
    pub jobs_succeeded: u64,
    pub error_counts: ErrorCounts,
    pub avg_latency_ms: AvgLatency,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ErrorCounts {
    pub transport: u64,
    pub remote: u64,
    pub timeout: u64,
    pub canceled: u64,
    pub internal: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvgLatency {
    pub segment: Option<f64>,
    pub job: Option<f64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_jobs_submitted(&self) {
        self.state.lock().jobs_submitted += 1;
    }

    pub fn inc_jobs_succeeded(&self) {
        self.state.lock().jobs_succeeded += 1;
    }

    pub fn inc_error(&self, code: ErrorCode) {
        let errors = &mut self.state.lock().errors;
        match code {
            ErrorCode::Transport => errors.transport += 1,
            ErrorCode::Protocol
            | ErrorCode::Rejected
            | ErrorCode::JobFailed
            | ErrorCode::NoSpeech => errors.remote += 1,
            ErrorCode::Timeout => errors.timeout += 1,
            ErrorCode::Canceled => errors.canceled += 1,
            ErrorCode::Config | ErrorCode::Io | ErrorCode::InvalidInput | ErrorCode::Internal => {
                errors.internal += 1
            }
        }
    }

    pub fn record_latency(&self, phase: Phase, duration_ms: u64) {
        let mut state = self.state.lock();
        match phase {
            Phase::Segment => state.segment.record(duration_ms),
            Phase::Job => state.job.record(duration_ms),
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let state = self.state.lock();
        MetricsSummary {
            jobs_submitted: state.jobs_submitted,
            jobs_succeeded: state.jobs_succeeded,
            error_counts: state.errors,
            avg_latency_ms: AvgLatency {
                segment: state.segment.average(),
                job: state.job.average(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let m = Metrics::new();
        m.inc_jobs_submitted();
        m.inc_jobs_submitted();
        m.inc_jobs_succeeded();
        m.inc_error(ErrorCode::Transport);
        m.inc_error(ErrorCode::JobFailed);
        m.inc_error(ErrorCode::NoSpeech);
        m.inc_error(ErrorCode::Timeout);
        m.inc_error(ErrorCode::InvalidInput);

        let s = m.summary();
        assert_eq!(s.jobs_submitted, 2);
        assert_eq!(s.jobs_succeeded, 1);
        assert_eq!(s.error_counts.transport, 1);
        assert_eq!(s.error_counts.remote, 2);
        assert_eq!(s.error_counts.timeout, 1);
        assert_eq!(s.error_counts.canceled, 0);
        assert_eq!(s.error_counts.internal, 1);
    }

    #[test]
    fn test_latency_averages() {
        let m = Metrics::new();
        assert!(m.summary().avg_latency_ms.segment.is_none());

        m.record_latency(Phase::Segment, 120);
        m.record_latency(Phase::Segment, 80);
        m.record_latency(Phase::Job, 200);

        let avg = m.summary().avg_latency_ms;
        assert_eq!(avg.segment, Some(100.0));
        assert_eq!(avg.job, Some(200.0));
    }

    #[test]
    fn test_summary_serializes() {
        let m = Metrics::new();
        m.record_latency(Phase::Job, 10);
        let v = serde_json::to_value(m.summary()).unwrap();
        assert_eq!(v["avg_latency_ms"]["job"], 10.0);
        assert!(v["avg_latency_ms"]["segment"].is_null());
        assert_eq!(v["error_counts"]["transport"], 0);
    }
}
