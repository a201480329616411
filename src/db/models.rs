use crate::core::RunStatus;
use serde::Serialize;

/// 运行历史记录（数据库行）
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: String,
    /// Unix 秒
    pub started_at: i64,
    pub finished_at: i64,
    pub uploaded: i64,
    pub skipped: i64,
    pub deleted: i64,
    pub errors: i64,
    pub bytes_transferred: i64,
    pub status: String,
    pub fatal_error: Option<String>,
    pub notification_error: Option<String>,
}

impl RunRecord {
    pub fn status(&self) -> Option<RunStatus> {
        match self.status.as_str() {
            "success" => Some(RunStatus::Success),
            "partial_failure" => Some(RunStatus::PartialFailure),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }
}
