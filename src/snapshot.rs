//! 每日 JSON 快照：当天的对象不存在时才抓取并写入

use crate::config::SnapshotConfig;
use crate::source::Source;
use crate::storage::Storage;
use chrono::NaiveDate;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("快照对象查询失败 {key}: {reason}")]
    Lookup { key: String, reason: String },

    #[error("快照接口请求失败 {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("快照内容无效: {0}")]
    InvalidPayload(String),

    #[error("快照写入失败 {key}: {reason}")]
    Write { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// 当天快照已存在，未请求接口
    AlreadyPresent { key: String },
    Written { key: String, bytes: u64 },
}

/// 校验接口返回：必须是 JSON 对象，且 `data` 成员非空
pub fn validate_payload(body: &[u8]) -> Result<(), SnapshotError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| SnapshotError::InvalidPayload(format!("不是合法的 JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| SnapshotError::InvalidPayload("顶层不是对象".to_string()))?;

    let empty = match object.get("data") {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::Array(items)) => items.is_empty(),
        Some(serde_json::Value::Object(map)) => map.is_empty(),
        Some(serde_json::Value::String(s)) => s.is_empty(),
        Some(_) => false,
    };
    if empty {
        return Err(SnapshotError::InvalidPayload("缺少 data 或 data 为空".to_string()));
    }
    Ok(())
}

pub struct SnapshotJob {
    source: Arc<dyn Source>,
    storage: Arc<dyn Storage>,
    config: SnapshotConfig,
}

impl SnapshotJob {
    pub fn new(source: Arc<dyn Source>, storage: Arc<dyn Storage>, config: SnapshotConfig) -> Self {
        Self {
            source,
            storage,
            config,
        }
    }

    pub fn key_for(&self, date: NaiveDate) -> String {
        let mut prefix = self.config.key_prefix.trim_matches('/').to_string();
        if !prefix.is_empty() {
            prefix.push('/');
        }
        format!("{}{}/{}", prefix, date.format("%Y-%m-%d"), self.config.file_name)
    }

    pub async fn run(&self, date: NaiveDate) -> Result<SnapshotOutcome, SnapshotError> {
        let key = self.key_for(date);

        let exists = self
            .storage
            .exists(&key)
            .await
            .map_err(|e| SnapshotError::Lookup {
                key: key.clone(),
                reason: format!("{:#}", e),
            })?;
        if exists {
            info!("快照已存在，跳过: {}", key);
            return Ok(SnapshotOutcome::AlreadyPresent { key });
        }

        let body = self
            .source
            .fetch(&self.config.url)
            .await
            .map_err(|e| SnapshotError::Fetch {
                url: self.config.url.clone(),
                reason: format!("{:#}", e),
            })?;
        validate_payload(&body)?;

        let bytes = self
            .storage
            .write(&key, body, "application/json")
            .await
            .map_err(|e| SnapshotError::Write {
                key: key.clone(),
                reason: format!("{:#}", e),
            })?;

        info!("快照已写入: {} ({} 字节)", key, bytes);
        Ok(SnapshotOutcome::Written { key, bytes })
    }
}
