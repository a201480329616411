use super::{file_name, ByteStream, ObjectEntry, ObjectMeta, Storage};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use walkdir::WalkDir;

/// 暂存文件后缀，写入完成后重命名为正式文件
const STAGING_SUFFIX: &str = ".partial";

pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    pub fn new(path: &str) -> Result<Self> {
        let base_path = PathBuf::from(path);
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }
        let name = format!("local:{}", path);
        Ok(Self { base_path, name })
    }

    fn resolve_path(&self, key: &str) -> PathBuf {
        let key = key.trim_start_matches('/').trim_start_matches('\\');
        if key.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(key)
        }
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }

    fn staging_path(full_path: &Path, key: &str) -> PathBuf {
        let staging_name = format!(".{}.{}{}", file_name(key), uuid::Uuid::new_v4(), STAGING_SUFFIX);
        full_path.with_file_name(staging_name)
    }

    fn to_meta(metadata: &std::fs::Metadata) -> ObjectMeta {
        ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            etag: None,
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        // 只遍历前缀中的目录部分，再按完整前缀过滤
        let dir = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let walk_root = self.resolve_path(dir);

        if !walk_root.exists() {
            return Ok(Vec::new());
        }

        let base_path = self.base_path.clone();
        let prefix = prefix.to_string();

        // 使用 spawn_blocking 避免阻塞 async runtime
        let entries = tokio::task::spawn_blocking(move || {
            WalkDir::new(&walk_root)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter_map(|entry| {
                    let metadata = entry.metadata().ok()?;
                    if metadata.is_dir() {
                        return None;
                    }

                    let relative = entry.path().strip_prefix(&base_path).ok()?.to_str()?;
                    let key = Self::normalize_path(relative);

                    if !key.starts_with(&prefix) || key.ends_with(STAGING_SUFFIX) {
                        return None;
                    }

                    Some(ObjectEntry {
                        key,
                        meta: Self::to_meta(&metadata),
                    })
                })
                .collect::<Vec<_>>()
        })
        .await?;

        Ok(entries)
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectMeta>> {
        match fs::metadata(self.resolve_path(key)).await {
            Ok(metadata) if metadata.is_dir() => Ok(None),
            Ok(metadata) => Ok(Some(Self::to_meta(&metadata))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_stream(&self, key: &str) -> Result<ByteStream> {
        let file = fs::File::open(self.resolve_path(key)).await?;
        Ok(Box::pin(ReaderStream::new(file).map_err(anyhow::Error::from)))
    }

    async fn write_stream(
        &self,
        key: &str,
        mut stream: ByteStream,
        _content_type: &str,
    ) -> Result<u64> {
        let full_path = self.resolve_path(key);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 使用临时文件写入，然后原子重命名
        let temp_path = Self::staging_path(&full_path, key);
        let result: Result<u64> = async {
            let mut file = fs::File::create(&temp_path).await?;
            let mut written = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(written)
        }
        .await;

        match result {
            Ok(written) => {
                if let Err(e) = fs::rename(&temp_path, &full_path).await {
                    let _ = fs::remove_file(&temp_path).await;
                    return Err(e.into());
                }
                Ok(written)
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(e)
            }
        }
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            match fs::remove_file(self.resolve_path(key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
