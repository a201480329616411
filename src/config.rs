//! 应用配置模块
//!
//! 配置从 JSON 文件加载，随后由环境变量覆盖（与定时任务部署方式保持一致）。

use crate::logging::LogConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 存储类型
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    #[default]
    S3,
    Memory,
}

/// 目标存储配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(rename = "type", default)]
    pub typ: StorageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// 存储根目录（opendal root）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// 镜像对象所在的 key 前缀
    #[serde(default)]
    pub prefix: String,
}

impl StorageConfig {
    /// 规范化后的 key 前缀（非空时以 / 结尾）
    pub fn key_prefix(&self) -> String {
        let prefix = self.prefix.trim_start_matches('/');
        if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{}/", prefix)
        }
    }
}

/// 远程源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    /// 目录页地址
    #[serde(default)]
    pub url: String,
    /// 链接路径前缀，只有以此开头的链接才是候选文件
    #[serde(default)]
    pub link_prefix: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// 为空时使用目录页地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_head_timeout")]
    pub head_timeout_secs: u64,
    #[serde(default = "default_get_timeout")]
    pub get_timeout_secs: u64,
}

fn default_user_agent() -> String {
    concat!("srcmirror/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_head_timeout() -> u64 {
    10
}

fn default_get_timeout() -> u64 {
    20
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            link_prefix: String::new(),
            user_agent: default_user_agent(),
            referer: None,
            connect_timeout_secs: default_connect_timeout(),
            head_timeout_secs: default_head_timeout(),
            get_timeout_secs: default_get_timeout(),
        }
    }
}

/// 同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// 最大并发处理数
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,
    /// 最大重试次数（源元数据、目标查询、传输）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 重试基础延迟（毫秒），按指数退避
    #[serde(default = "default_retry_delay")]
    pub retry_base_delay_ms: u64,
    /// 批量删除上限（S3 单次最多 1000 个）
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,
    /// 大小不同但源时间不晚于目标时也跳过
    #[serde(default)]
    pub timestamp_overrides_size_mismatch: bool,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    500
}

fn default_delete_batch_size() -> usize {
    1000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: default_max_concurrent(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_delay(),
            delete_batch_size: default_delete_batch_size(),
            timestamp_overrides_size_mismatch: false,
        }
    }
}

/// 失败通知配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyConfig {
    /// 未配置时只写日志
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default = "default_subject")]
    pub subject: String,
}

fn default_subject() -> String {
    "Source mirror sync failed".to_string()
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            subject: default_subject(),
        }
    }
}

/// 每日快照配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotConfig {
    pub url: String,
    pub key_prefix: String,
    #[serde(default = "default_snapshot_file")]
    pub file_name: String,
}

fn default_snapshot_file() -> String {
    "snapshot.json".to_string()
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub destination: StorageConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotConfig>,
    /// 运行历史数据库路径，为空时不记录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_db: Option<String>,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// 加载配置：配置文件（可选）+ 环境变量覆盖 + 校验
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = fs::read_to_string(p)
                    .with_context(|| format!("读取配置文件失败: {}", p.display()))?;
                serde_json::from_str::<AppConfig>(&content)
                    .with_context(|| format!("解析配置文件失败: {}", p.display()))?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// 使用环境变量覆盖配置
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("bls_url") {
            self.source.url = url;
        }
        if let Some(prefix) = get("bls_link_prefix") {
            self.source.link_prefix = prefix;
        }
        if let Some(ua) = get("user_agent") {
            self.source.user_agent = ua;
        }
        if let Some(bucket) = get("s3_bucket") {
            self.destination.typ = StorageType::S3;
            self.destination.bucket = Some(bucket);
        }
        if let Some(region) = get("s3_region").or_else(|| get("AWS_REGION")) {
            self.destination.region = Some(region);
        }
        if let Some(prefix) = get("s3_bls_key") {
            self.destination.prefix = prefix;
        }
        if let Some(url) = get("notify_webhook_url") {
            self.notify.webhook_url = Some(url);
        }
        if let Some(db) = get("history_db") {
            self.history_db = Some(db);
        }

        // 快照需要 URL 和 key 前缀同时存在
        let snapshot_url = get("census_url");
        let snapshot_prefix = get("s3_census_key");
        if let Some(snapshot) = self.snapshot.as_mut() {
            if let Some(url) = snapshot_url {
                snapshot.url = url;
            }
            if let Some(prefix) = snapshot_prefix {
                snapshot.key_prefix = prefix;
            }
        } else if let (Some(url), Some(key_prefix)) = (snapshot_url, snapshot_prefix) {
            self.snapshot = Some(SnapshotConfig {
                url,
                key_prefix,
                file_name: default_snapshot_file(),
            });
        }
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.source.url.trim().is_empty() {
            bail!("source.url 不能为空");
        }
        reqwest::Url::parse(&self.source.url)
            .with_context(|| format!("source.url 无效: {}", self.source.url))?;
        if self.source.link_prefix.is_empty() {
            bail!("source.linkPrefix 不能为空");
        }
        if self.sync.max_concurrent_transfers == 0 {
            bail!("sync.maxConcurrentTransfers 必须大于 0");
        }
        if self.sync.delete_batch_size == 0 {
            bail!("sync.deleteBatchSize 必须大于 0");
        }

        // 清理会删除前缀下所有未在源站出现的对象
        let mirror_prefix = self.destination.key_prefix();
        if mirror_prefix.is_empty() {
            bail!("destination.prefix 不能为空");
        }
        if let Some(snapshot) = &self.snapshot {
            let snapshot_prefix = snapshot.key_prefix.trim_matches('/');
            if format!("{}/", snapshot_prefix).starts_with(&mirror_prefix) {
                bail!(
                    "snapshot.keyPrefix ({}) 不能位于 destination.prefix ({}) 之下",
                    snapshot.key_prefix,
                    mirror_prefix
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid_config() -> AppConfig {
        AppConfig {
            source: SourceConfig {
                url: "https://download.example.gov/pub/time.series/pr/".to_string(),
                link_prefix: "/pub/time.series/pr/pr.".to_string(),
                ..Default::default()
            },
            destination: StorageConfig {
                typ: StorageType::Memory,
                prefix: "bls/pr".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn snapshot(key_prefix: &str) -> SnapshotConfig {
        SnapshotConfig {
            url: "https://api.example.org/population".to_string(),
            key_prefix: key_prefix.to_string(),
            file_name: default_snapshot_file(),
        }
    }

    #[test]
    fn test_defaults_from_minimal_json() {
        let json = r#"{
            "source": { "url": "https://example.org/pub/", "linkPrefix": "/pub/pr." },
            "destination": { "type": "memory", "prefix": "bls/pr" }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.destination.typ, StorageType::Memory);
        assert_eq!(config.destination.key_prefix(), "bls/pr/");
        assert_eq!(config.sync.max_concurrent_transfers, 4);
        assert_eq!(config.sync.delete_batch_size, 1000);
        assert!(!config.sync.timestamp_overrides_size_mismatch);
        assert_eq!(config.source.head_timeout_secs, 10);
        assert!(config.snapshot.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_key_prefix_normalization() {
        let mut storage = StorageConfig::default();
        assert_eq!(storage.key_prefix(), "");
        storage.prefix = "/bls/pr/".to_string();
        assert_eq!(storage.key_prefix(), "bls/pr/");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("bls_url", "https://mirror.example.org/pr/"),
            ("s3_bucket", "raw-bucket"),
            ("s3_bls_key", "bls/pr"),
            ("census_url", "https://api.example.org/population"),
            ("s3_census_key", "census/"),
            ("user_agent", ""),
        ]
        .into_iter()
        .collect();

        let mut config = valid_config();
        config.destination.typ = StorageType::Memory;
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.source.url, "https://mirror.example.org/pr/");
        assert_eq!(config.destination.typ, StorageType::S3);
        assert_eq!(config.destination.bucket.as_deref(), Some("raw-bucket"));
        assert_eq!(config.destination.key_prefix(), "bls/pr/");
        // 空值不覆盖
        assert_eq!(config.source.user_agent, default_user_agent());

        let snapshot = config.snapshot.unwrap();
        assert_eq!(snapshot.url, "https://api.example.org/population");
        assert_eq!(snapshot.key_prefix, "census/");
        assert_eq!(snapshot.file_name, "snapshot.json");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = valid_config();
        config.source.link_prefix.clear();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.sync.max_concurrent_transfers = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.sync.delete_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.source.url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_mirror_prefix() {
        for prefix in ["", "/", "//"] {
            let mut config = valid_config();
            config.destination.prefix = prefix.to_string();
            assert!(config.validate().is_err(), "prefix {:?}", prefix);
        }
    }

    #[test]
    fn test_validate_keeps_snapshot_outside_mirror_prefix() {
        let mut config = valid_config();
        config.snapshot = Some(snapshot("census/"));
        assert!(config.validate().is_ok());

        // 与镜像前缀相邻但不在其下
        config.snapshot = Some(snapshot("bls/pr-snapshots"));
        assert!(config.validate().is_ok());

        for prefix in ["bls/pr/census", "/bls/pr/", "bls/pr"] {
            config.snapshot = Some(snapshot(prefix));
            assert!(config.validate().is_err(), "snapshot prefix {:?}", prefix);
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = valid_config();
        fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.source.link_prefix, "/pub/time.series/pr/pr.");
    }
}
