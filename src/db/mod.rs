pub mod models;
pub use models::*;

use crate::core::RunResult;
use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// 运行历史存储
#[derive(Clone)]
pub struct RunHistory {
    pool: SqlitePool,
}

impl RunHistory {
    /// 打开（不存在则创建）数据库并执行迁移
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("创建数据库目录失败: {}", parent.display()))?;
        }

        // Windows 路径需要转换反斜杠为正斜杠
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid database path"))?
            .replace('\\', "/");

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&format!("sqlite:{}?mode=rwc", path_str))
            .await
            .with_context(|| format!("打开数据库失败: {}", path_str))?;

        Self::migrate(pool).await
    }

    /// 内存数据库（单连接，连接关闭即丢失）
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// 保存一次运行结果
    pub async fn record(&self, result: &RunResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mirror_runs (run_id, started_at, finished_at, uploaded, skipped, deleted, errors, bytes_transferred, status, fatal_error, notification_error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                finished_at = excluded.finished_at,
                uploaded = excluded.uploaded,
                skipped = excluded.skipped,
                deleted = excluded.deleted,
                errors = excluded.errors,
                bytes_transferred = excluded.bytes_transferred,
                status = excluded.status,
                fatal_error = excluded.fatal_error,
                notification_error = excluded.notification_error
            "#,
        )
        .bind(&result.run_id)
        .bind(result.started_at.timestamp())
        .bind(result.finished_at.timestamp())
        .bind(result.uploaded as i64)
        .bind(result.skipped as i64)
        .bind(result.deleted as i64)
        .bind(result.errors as i64)
        .bind(result.bytes_transferred as i64)
        .bind(result.status.as_str())
        .bind(&result.fatal_error)
        .bind(&result.notification_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 最近的运行记录（按开始时间倒序）
    pub async fn recent(&self, limit: i64) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query_as::<_, RunRecord>(
            "SELECT * FROM mirror_runs ORDER BY started_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
