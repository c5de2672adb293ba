// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::FetcherSettings;
use crate::domain::models::recrawl::ContentClass;
use crate::domain::models::task::{CrawlPayload, Validators};
use crate::domain::services::fetcher::{FetchError, FetchedPage, Fetcher};
use crate::utils::url_utils::normalize_link;
use async_trait::async_trait;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE,
    IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::StatusCode;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// 视为脚本渲染页面的脚本数量下限
const RENDERED_SCRIPT_THRESHOLD: usize = 5;
/// 脚本渲染页面的可见文本长度上限
const RENDERED_TEXT_CEILING: usize = 200;

/// 基于 reqwest 的 HTTP 抓取器
///
/// 带有上次校验信息时发送条件请求，304 响应视为内容未变化
pub struct HttpFetcher {
    client: reqwest::Client,
    link_selector: Selector,
    script_selector: Selector,
    body_selector: Selector,
}

impl HttpFetcher {
    /// 创建抓取器
    ///
    /// # 参数
    ///
    /// * `settings` - 抓取器配置
    ///
    /// # 返回值
    ///
    /// * `Ok(HttpFetcher)` - 抓取器实例
    /// * `Err(anyhow::Error)` - HTTP客户端构建失败
    pub fn new(settings: &FetcherSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            link_selector: selector("a[href]")?,
            script_selector: selector("script")?,
            body_selector: selector("body")?,
        })
    }

    fn request_headers(payload: &CrawlPayload) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in &payload.headers {
            if let (Ok(k), Ok(v)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                headers.insert(k, v);
            }
        }
        if let Some(etag) = payload.validators.etag.as_deref() {
            if let Ok(v) = HeaderValue::from_str(etag) {
                headers.insert(IF_NONE_MATCH, v);
            }
        }
        if let Some(last_modified) = payload.validators.last_modified.as_deref() {
            if let Ok(v) = HeaderValue::from_str(last_modified) {
                headers.insert(IF_MODIFIED_SINCE, v);
            }
        }
        headers
    }

    /// 提取链接并判断是否为脚本渲染页面
    ///
    /// `Html` 不能跨越 await，解析在同步函数中完成
    fn analyze(&self, base: &Url, body: &str) -> (Vec<String>, bool) {
        let document = Html::parse_document(body);

        let mut seen = HashSet::new();
        let links = document
            .select(&self.link_selector)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| normalize_link(base, href))
            .map(|u| u.to_string())
            .filter(|u| seen.insert(u.clone()))
            .collect();

        let scripts = document.select(&self.script_selector).count();
        let text_len: usize = document
            .select(&self.body_selector)
            .flat_map(|b| b.text())
            .map(|t| t.trim().len())
            .sum();
        let script_heavy =
            scripts >= RENDERED_SCRIPT_THRESHOLD && text_len < RENDERED_TEXT_CEILING;

        (links, script_heavy)
    }
}

fn selector(css: &str) -> anyhow::Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("invalid selector {}: {}", css, e))
}

/// 内容哈希（SHA-256 十六进制）
pub fn content_hash(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

/// 按缓存头与页面结构判断内容分类
fn classify(headers: &HeaderMap, script_heavy: bool) -> ContentClass {
    if script_heavy {
        return ContentClass::Rendered;
    }
    let cache_control = headers
        .get(CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    let uncacheable = cache_control
        .split(',')
        .map(str::trim)
        .any(|d| d == "no-cache" || d == "no-store" || d == "max-age=0");
    if uncacheable {
        ContentClass::Dynamic
    } else {
        ContentClass::Static
    }
}

fn classify_status(status: StatusCode) -> Result<(), FetchError> {
    if status.is_success() {
        return Ok(());
    }
    let message = format!("HTTP {}", status.as_u16());
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Err(FetchError::transient(message))
    } else {
        Err(FetchError::permanent(message))
    }
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self, payload), fields(depth = payload.depth))]
    async fn fetch(&self, url: &str, payload: &CrawlPayload) -> Result<FetchedPage, FetchError> {
        let base = Url::parse(url).map_err(|e| FetchError::permanent(format!("invalid url: {}", e)))?;

        let response = self
            .client
            .get(base.clone())
            .headers(Self::request_headers(payload))
            .send()
            .await
            .map_err(|e| FetchError::transient(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();

        if status == StatusCode::NOT_MODIFIED {
            debug!(url = %url, "Content not modified");
            return Ok(FetchedPage {
                body: String::new(),
                links: Vec::new(),
                content_class: classify(&headers, false),
                content_hash: payload.validators.content_hash.clone().unwrap_or_default(),
                validators: payload.validators.clone(),
                not_modified: true,
            });
        }
        classify_status(status)?;

        let content_type = header_string(&headers, CONTENT_TYPE)
            .unwrap_or_else(|| "text/html".to_string())
            .to_ascii_lowercase();
        if !content_type.starts_with("text/") && !content_type.contains("html") {
            return Err(FetchError::permanent(format!(
                "unsupported content type: {}",
                content_type
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::transient(e.to_string()))?;
        let (links, script_heavy) = self.analyze(&base, &body);
        let hash = content_hash(&body);

        Ok(FetchedPage {
            links,
            content_class: classify(&headers, script_heavy),
            validators: Validators {
                etag: header_string(&headers, ETAG),
                last_modified: header_string(&headers, LAST_MODIFIED),
                content_hash: Some(hash.clone()),
            },
            content_hash: hash,
            body,
            not_modified: false,
        })
    }
}
