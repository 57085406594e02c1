//! HTTP 백엔드 - reqwest + scraper
//!
//! JavaScript를 실행하지 않는 읽기 전용 브라우저입니다.
//! 서버 렌더링되는 대상이나 셀렉터 점검용으로 사용하며,
//! 클릭/입력이 필요한 게시 흐름은 지원하지 않습니다.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{dom, BrowserLauncher, BrowserSession, PageAdapter};
use crate::error::{CrawlError, CrawlResult};

const USER_AGENT: &str = concat!("crawl-forum/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Launcher / Session
// ============================================================================

/// HTTP 백엔드 런처
pub struct HttpLauncher {
    timeout: Duration,
}

impl HttpLauncher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl BrowserLauncher for HttpLauncher {
    async fn launch(&self) -> CrawlResult<Arc<dyn BrowserSession>> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout)
            .build()
            .map_err(|e| CrawlError::Browser(format!("HTTP client build failed: {}", e)))?;

        Ok(Arc::new(HttpSession { client }))
    }
}

struct HttpSession {
    client: reqwest::Client,
}

#[async_trait]
impl BrowserSession for HttpSession {
    async fn new_page(&self) -> CrawlResult<Box<dyn PageAdapter>> {
        Ok(Box::new(HttpPage {
            client: self.client.clone(),
            loaded: Mutex::new(None),
        }))
    }

    async fn close(&self) -> CrawlResult<()> {
        Ok(())
    }
}

// ============================================================================
// HttpPage
// ============================================================================

/// 마지막으로 불러온 문서
struct Loaded {
    url: url::Url,
    html: String,
}

struct HttpPage {
    client: reqwest::Client,
    loaded: Mutex<Option<Loaded>>,
}

impl HttpPage {
    /// 현재 문서에 질의 실행 (문서가 없으면 빈 문서로 취급)
    async fn query<T>(
        &self,
        f: impl FnOnce(&str, Option<&url::Url>) -> CrawlResult<T>,
    ) -> CrawlResult<T> {
        let loaded = self.loaded.lock().await;
        match loaded.as_ref() {
            Some(doc) => f(&doc.html, Some(&doc.url)),
            None => f("", None),
        }
    }
}

#[async_trait]
impl PageAdapter for HttpPage {
    async fn navigate(&self, url: &str) -> CrawlResult<()> {
        tracing::debug!("HTTP GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CrawlError::navigation(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::navigation(url, format!("HTTP {}", status)));
        }

        let final_url = response.url().clone();
        let html = response
            .text()
            .await
            .map_err(|e| CrawlError::navigation(url, e))?;

        *self.loaded.lock().await = Some(Loaded {
            url: final_url,
            html,
        });
        Ok(())
    }

    async fn attribute_all(&self, selector: &str, name: &str) -> CrawlResult<Vec<Option<String>>> {
        self.query(|html, _| dom::attribute_all(html, selector, name)).await
    }

    async fn exists(&self, selector: &str) -> CrawlResult<bool> {
        self.query(|html, _| dom::exists(html, selector)).await
    }

    async fn text(&self, selector: &str) -> CrawlResult<Option<String>> {
        self.query(|html, _| dom::text(html, selector)).await
    }

    async fn link(&self, selector: &str) -> CrawlResult<Option<String>> {
        self.query(|html, base| dom::link(html, selector, base)).await
    }

    async fn inner_html(&self, selector: &str) -> CrawlResult<Option<String>> {
        self.query(|html, _| dom::inner_html(html, selector)).await
    }

    async fn click(&self, _selector: &str) -> CrawlResult<()> {
        Err(CrawlError::Unsupported("click"))
    }

    async fn fill(&self, _selector: &str, _value: &str) -> CrawlResult<()> {
        Err(CrawlError::Unsupported("fill"))
    }

    async fn press_key(&self, _selector: &str, _key: &str) -> CrawlResult<()> {
        Err(CrawlError::Unsupported("press_key"))
    }

    async fn wait_for_navigation(&self) -> CrawlResult<()> {
        Ok(())
    }

    async fn close(&self) -> CrawlResult<()> {
        self.loaded.lock().await.take();
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
