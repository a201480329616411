//! 运行统计与结果汇总

use super::error::MirrorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// 运行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunStatus {
    /// 全部完成，无错误
    Success,
    /// 运行完成，但部分文件出错
    PartialFailure,
    /// 致命错误，运行中止
    Failed,
    /// 被取消
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::PartialFailure => "partial_failure",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 运行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub uploaded: u64,
    pub skipped: u64,
    pub deleted: u64,
    pub errors: u64,
    pub bytes_transferred: u64,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_error: Option<String>,
}

/// 计数器（并发工作任务共享）
#[derive(Debug, Default)]
pub struct RunStats {
    uploaded: AtomicU64,
    skipped: AtomicU64,
    deleted: AtomicU64,
    errors: AtomicU64,
    bytes_transferred: AtomicU64,
}

/// 运行汇总器
///
/// 每个候选文件的最终结果只记录一次；计数只能通过 record_* 修改。
#[derive(Debug)]
pub struct RunAggregator {
    run_id: String,
    started_at: DateTime<Utc>,
    stats: RunStats,
}

impl RunAggregator {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            stats: RunStats::default(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record_uploaded(&self, bytes: u64) {
        self.stats.uploaded.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.stats.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deleted(&self, n: u64) {
        self.stats.deleted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.stats.errors.load(Ordering::Relaxed)
    }

    fn build(&self, status: RunStatus, fatal_error: Option<String>) -> RunResult {
        RunResult {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            uploaded: self.stats.uploaded.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            deleted: self.stats.deleted.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
            bytes_transferred: self.stats.bytes_transferred.load(Ordering::Relaxed),
            status,
            fatal_error,
            notification_error: None,
        }
    }

    /// 正常结束：无错误为 Success，否则 PartialFailure
    pub fn finalize(&self) -> RunResult {
        let status = if self.errors() == 0 {
            RunStatus::Success
        } else {
            RunStatus::PartialFailure
        };
        self.build(status, None)
    }

    /// 致命错误结束
    pub fn finalize_failed(&self, err: &MirrorError) -> RunResult {
        self.build(RunStatus::Failed, Some(err.to_string()))
    }

    /// 取消结束
    pub fn finalize_cancelled(&self) -> RunResult {
        self.build(RunStatus::Cancelled, Some(MirrorError::Cancelled.to_string()))
    }
}

impl Default for RunAggregator {
    fn default() -> Self {
        Self::new()
    }
}
