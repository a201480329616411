use super::error::{reason, MirrorError};
use crate::source::Source;
use regex::Regex;
use reqwest::Url;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{debug, info};

/// 本次运行中源站存在的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// 文件名（已解码），运行内唯一
    pub name: String,
    pub source_url: String,
    /// 目标前缀 + 文件名
    pub destination_key: String,
}

/// 本次运行在源站看到的文件名集合，仅用于清理
#[derive(Debug, Clone, Default)]
pub struct SeenSet(HashSet<String>);

impl SeenSet {
    pub fn from_candidates(candidates: &[Candidate]) -> Self {
        Self(candidates.iter().map(|c| c.name.clone()).collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn href_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<a\s[^>]*?\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
            .expect("href pattern is valid")
    })
}

/// 提取页面中所有 <a href> 的值（按出现顺序）
pub fn extract_hrefs(html: &str) -> Vec<String> {
    href_regex()
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .map(|m| m.as_str().replace("&amp;", "&"))
        .collect()
}

/// 目录页地址需以 / 结尾，否则 join 会替换最后一段
fn directory_url(base_url: &str) -> Result<Url, String> {
    let normalized = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    };
    Url::parse(&normalized).map_err(|e| e.to_string())
}

/// 从目录页解析候选文件
///
/// 只保留以 `link_prefix` 开头的链接，这样可以排除上级目录、兄弟目录和其他资源。
pub fn parse_listing(
    html: &str,
    base_url: &str,
    link_prefix: &str,
    dest_prefix: &str,
) -> Result<Vec<Candidate>, MirrorError> {
    let base = directory_url(base_url).map_err(|e| MirrorError::SourceUnreachable {
        url: base_url.to_string(),
        reason: format!("invalid url: {}", e),
    })?;

    let mut names = HashSet::new();
    let mut candidates = Vec::new();

    for href in extract_hrefs(html) {
        if !href.starts_with(link_prefix) {
            continue;
        }

        // 去掉查询串和锚点
        let path = href.split(['?', '#']).next().unwrap_or_default();
        let raw_name = path.rsplit('/').next().unwrap_or_default();
        if raw_name.is_empty() {
            continue;
        }

        let name = urlencoding::decode(raw_name)
            .map(|n| n.into_owned())
            .unwrap_or_else(|_| raw_name.to_string());
        // "." 和 ".." 会解析到目录本身或上级目录
        if name == "." || name == ".." || name.contains('/') || !names.insert(name.clone()) {
            debug!("忽略重复或无效链接: {}", href);
            continue;
        }

        let source_url = match base.join(raw_name) {
            Ok(u) => u.to_string(),
            Err(e) => {
                debug!("无法解析链接 {}: {}", href, e);
                continue;
            }
        };

        candidates.push(Candidate {
            destination_key: format!("{}{}", dest_prefix, name),
            name,
            source_url,
        });
    }

    Ok(candidates)
}

/// 获取目录页并返回候选文件；失败即致命
pub async fn list_candidates(
    source: &dyn Source,
    base_url: &str,
    link_prefix: &str,
    dest_prefix: &str,
) -> Result<Vec<Candidate>, MirrorError> {
    let body = source
        .fetch(base_url)
        .await
        .map_err(|e| MirrorError::SourceUnreachable {
            url: base_url.to_string(),
            reason: reason(&e),
        })?;

    let html = String::from_utf8_lossy(&body);
    let candidates = parse_listing(&html, base_url, link_prefix, dest_prefix)?;
    info!("源目录 {} 共 {} 个候选文件", base_url, candidates.len());
    Ok(candidates)
}
