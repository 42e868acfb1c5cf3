//! HTTP link previews
//!
//! Fetches the first http(s) link of a message body and extracts its title
//! and OpenGraph description and image. Only HTML responses are inspected,
//! and only the first `max_bytes` of them.

use async_trait::async_trait;
use ircbnc_core::config::PreviewConfig;
use ircbnc_core::{Error, Preview, PreviewService, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;
use tracing::debug;
use url::Url;

lazy_static! {
    static ref LINK: Regex = Regex::new(r#"https?://[^\s<>"']+"#).unwrap();
    static ref TITLE: Regex = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap();
    static ref META: Regex = Regex::new(r"(?is)<meta\s[^>]*>").unwrap();
    static ref META_KEY: Regex = Regex::new(r#"(?i)\b(?:property|name)\s*=\s*["']([^"']+)["']"#).unwrap();
    static ref META_CONTENT: Regex = Regex::new(r#"(?i)\bcontent\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap();
}

/// First link in a message body
pub fn first_link(body: &str) -> Option<Url> {
    LINK.find_iter(body).find_map(|m| {
        let candidate = m.as_str().trim_end_matches(|c| matches!(c, '.' | ',' | ')' | '!' | '?' | ';' | ':'));
        Url::parse(candidate).ok()
    })
}

/// Build a preview from (a prefix of) an HTML document
pub fn parse_html(url: &Url, html: &str) -> Preview {
    let mut preview = Preview {
        url: url.to_string(),
        ..Default::default()
    };

    if let Some(title) = TITLE.captures(html).and_then(|c| c.get(1)) {
        preview.title = decode_entities(title.as_str().trim());
    }

    for tag in META.find_iter(html) {
        let tag = tag.as_str();
        let Some(key) = META_KEY.captures(tag).and_then(|c| c.get(1)) else {
            continue;
        };
        let Some(content) = META_CONTENT.captures(tag).and_then(|c| c.get(1).or_else(|| c.get(2))) else {
            continue;
        };
        let content = decode_entities(content.as_str().trim());
        match key.as_str().to_ascii_lowercase().as_str() {
            "og:title" => preview.title = content,
            "og:description" => preview.description = content,
            "description" if preview.description.is_empty() => preview.description = content,
            "og:image" => preview.image = url.join(&content).ok().map(|u| u.to_string()),
            _ => {}
        }
    }

    preview
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// Preview service backed by an HTTP client
#[derive(Debug, Clone)]
pub struct HttpPreview {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpPreview {
    pub fn new(config: &PreviewConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("ircbnc/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }

    async fn fetch(&self, url: &Url) -> Result<Option<String>> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            debug!(%url, status = %response.status(), "Preview fetch unsuccessful");
            return Ok(None);
        }
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v.to_ascii_lowercase().contains("text/html"));
        if !is_html {
            return Ok(None);
        }

        let mut body = Vec::new();
        while body.len() < self.max_bytes {
            let chunk = response
                .chunk()
                .await
                .map_err(|e| Error::Network(format!("Failed to read {}: {}", url, e)))?;
            match chunk {
                Some(chunk) => body.extend_from_slice(&chunk),
                None => break,
            }
        }
        body.truncate(self.max_bytes);
        Ok(Some(String::from_utf8_lossy(&body).into_owned()))
    }
}

#[async_trait]
impl PreviewService for HttpPreview {
    async fn get_preview(&self, body: &str) -> Result<Option<Preview>> {
        let Some(url) = first_link(body) else {
            return Ok(None);
        };
        let Some(html) = self.fetch(&url).await? else {
            return Ok(None);
        };
        Ok(Some(parse_html(&url, &html)))
    }
}
