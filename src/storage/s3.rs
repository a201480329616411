use super::{ByteStream, ObjectEntry, ObjectMeta, Storage, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use anyhow::Result;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use opendal::{layers::TimeoutLayer, Metadata, Metakey, Operator};
use std::time::Duration;

pub struct S3Storage {
    operator: Operator,
    name: String,
}

impl S3Storage {
    pub async fn new(
        bucket: &str,
        region: &str,
        access_key: Option<&str>,
        secret_key: Option<&str>,
        endpoint: Option<String>,
        root: Option<String>,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default().bucket(bucket).region(region);

        // 未配置密钥时使用环境变量或实例角色凭证
        if let (Some(ak), Some(sk)) = (access_key, secret_key) {
            builder = builder.access_key_id(ak).secret_access_key(sk);
        }

        if let Some(ref ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        if let Some(ref r) = root {
            builder = builder.root(r);
        }

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!(
            "s3://{}{}",
            bucket,
            root.as_deref()
                .map(|r| format!("/{}", r.trim_matches('/')))
                .unwrap_or_default()
        );

        Ok(Self { operator, name })
    }

    fn to_meta(meta: &Metadata) -> ObjectMeta {
        ObjectMeta {
            size: meta.content_length(),
            last_modified: meta.last_modified(),
            etag: meta.etag().map(|s| s.trim_matches('"').to_string()),
        }
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let mut objects = Vec::new();

        let mut lister = self
            .operator
            .lister_with(prefix)
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let key = entry.path().trim_start_matches('/').to_string();
            let meta = entry.metadata();

            // 跳过目录占位对象
            if key.is_empty() || meta.is_dir() || !key.starts_with(prefix) {
                continue;
            }

            objects.push(ObjectEntry {
                key,
                meta: Self::to_meta(meta),
            });
        }

        Ok(objects)
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectMeta>> {
        match self.operator.stat(key).await {
            Ok(meta) => Ok(Some(Self::to_meta(&meta))),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_stream(&self, key: &str) -> Result<ByteStream> {
        let reader = self.operator.reader(key).await?;
        let stream = reader.into_bytes_stream(..).await?;
        Ok(Box::pin(stream.map_err(anyhow::Error::from)))
    }

    async fn write_stream(
        &self,
        key: &str,
        mut stream: ByteStream,
        content_type: &str,
    ) -> Result<u64> {
        // writer 在 close 时才提交对象（单次 PUT 或分片合并）
        let mut writer = self
            .operator
            .writer_with(key)
            .content_type(content_type)
            .await?;
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    let _ = writer.abort().await;
                    return Err(e);
                }
            };
            written += chunk.len() as u64;
            if let Err(e) = writer.write(chunk).await {
                let _ = writer.abort().await;
                return Err(e.into());
            }
        }

        if let Err(e) = writer.close().await {
            let _ = writer.abort().await;
            return Err(e.into());
        }

        Ok(written)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        // S3 删除不存在的对象不会报错
        self.operator.remove(keys.to_vec()).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
