//! Chromium 백엔드 - chromiumoxide (CDP)
//!
//! 로컬 Chrome/Chromium을 실행하거나, `CRAWL_CDP_URL`이 있으면
//! 이미 떠 있는 브라우저에 연결합니다.
//!
//! chromiumoxide의 Page는 Drop 시 닫히지 않으므로 반드시 `close()`를 호출해야 합니다.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::element::Element;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{BrowserLauncher, BrowserSession, PageAdapter};
use crate::config::CrawlConfig;
use crate::error::{CrawlError, CrawlResult};

/// 샌드박스 비활성화 (컨테이너 환경)
const LAUNCH_ARGS: [&str; 2] = ["--no-sandbox", "--disable-setuid-sandbox"];

// ============================================================================
// ChromiumLauncher
// ============================================================================

/// Chromium 런처
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    headless: bool,
    cdp_url: Option<String>,
    navigation_timeout: Duration,
}

impl ChromiumLauncher {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            headless: config.headless,
            cdp_url: config.cdp_url.clone(),
            navigation_timeout: config.timings.navigation_timeout,
        }
    }

    fn browser_config(&self) -> CrawlResult<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .args(LAUNCH_ARGS)
            .request_timeout(self.navigation_timeout);
        if !self.headless {
            builder = builder.with_head();
        }
        builder.build().map_err(CrawlError::Browser)
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> CrawlResult<Arc<dyn BrowserSession>> {
        let (browser, mut handler) = match &self.cdp_url {
            Some(url) => {
                tracing::info!("Connecting to browser at {}", url);
                Browser::connect(url.as_str()).await
            }
            None => {
                tracing::info!("Launching Chromium (headless={})", self.headless);
                Browser::launch(self.browser_config()?).await
            }
        }
        .map_err(|e| CrawlError::Browser(format!("browser launch failed: {}", e)))?;

        // CDP 이벤트 핸들러 - 세션이 끝날 때까지 계속 폴링해야 함
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("CDP handler event error: {}", e);
                }
            }
        });

        Ok(Arc::new(ChromiumSession {
            browser: Mutex::new(Some(browser)),
            handler: std::sync::Mutex::new(Some(handler_task)),
            navigation_timeout: self.navigation_timeout,
        }))
    }
}

// ============================================================================
// ChromiumSession
// ============================================================================

struct ChromiumSession {
    /// close() 이후에는 None
    browser: Mutex<Option<Browser>>,
    handler: std::sync::Mutex<Option<JoinHandle<()>>>,
    navigation_timeout: Duration,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn new_page(&self) -> CrawlResult<Box<dyn PageAdapter>> {
        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| CrawlError::Browser("browser session already closed".to_string()))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| CrawlError::Browser(format!("failed to open page: {}", e)))?;

        Ok(Box::new(ChromiumPage {
            page,
            navigation_timeout: self.navigation_timeout,
        }))
    }

    async fn close(&self) -> CrawlResult<()> {
        let browser = self.browser.lock().await.take();

        let result = match browser {
            Some(mut browser) => {
                let closed = browser
                    .close()
                    .await
                    .map(|_| ())
                    .map_err(|e| CrawlError::Browser(format!("failed to close browser: {}", e)));
                // 실행한 프로세스 정리 (connect인 경우 무시됨)
                let _ = browser.wait().await;
                closed
            }
            None => Ok(()),
        };

        if let Ok(mut handler) = self.handler.lock() {
            if let Some(task) = handler.take() {
                task.abort();
            }
        }

        tracing::debug!("Browser session closed");
        result
    }
}

// ============================================================================
// ChromiumPage
// ============================================================================

struct ChromiumPage {
    page: Page,
    navigation_timeout: Duration,
}

impl ChromiumPage {
    async fn first(&self, selector: &str) -> CrawlResult<Option<Element>> {
        let mut elements = self.all(selector).await?;
        Ok(if elements.is_empty() {
            None
        } else {
            Some(elements.swap_remove(0))
        })
    }

    async fn all(&self, selector: &str) -> CrawlResult<Vec<Element>> {
        self.page
            .find_elements(selector)
            .await
            .map_err(|e| CrawlError::Browser(format!("query `{}` failed: {}", selector, e)))
    }

    async fn required(&self, selector: &str) -> CrawlResult<Element> {
        self.first(selector)
            .await?
            .ok_or_else(|| CrawlError::Browser(format!("element `{}` not found", selector)))
    }
}

fn cdp_error(action: &str, selector: &str, e: impl std::fmt::Display) -> CrawlError {
    CrawlError::Browser(format!("{} on `{}` failed: {}", action, selector, e))
}

#[async_trait]
impl PageAdapter for ChromiumPage {
    async fn navigate(&self, url: &str) -> CrawlResult<()> {
        tracing::debug!("Navigating to {}", url);
        // goto는 DOMContentLoaded가 아니라 이동 완료(load)까지 대기하며, navigation_timeout으로 상한을 둠
        match tokio::time::timeout(self.navigation_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(CrawlError::navigation(url, e)),
            Err(_) => Err(CrawlError::navigation(
                url,
                format!("timed out after {:?}", self.navigation_timeout),
            )),
        }
    }

    async fn attribute_all(&self, selector: &str, name: &str) -> CrawlResult<Vec<Option<String>>> {
        let elements = self.all(selector).await?;
        let mut values = Vec::with_capacity(elements.len());
        for element in elements {
            let value = element
                .attribute(name)
                .await
                .map_err(|e| cdp_error("attribute", selector, e))?;
            values.push(value);
        }
        Ok(values)
    }

    async fn exists(&self, selector: &str) -> CrawlResult<bool> {
        Ok(self.first(selector).await?.is_some())
    }

    async fn text(&self, selector: &str) -> CrawlResult<Option<String>> {
        match self.first(selector).await? {
            Some(element) => element
                .inner_text()
                .await
                .map_err(|e| cdp_error("inner_text", selector, e)),
            None => Ok(None),
        }
    }

    async fn link(&self, selector: &str) -> CrawlResult<Option<String>> {
        match self.first(selector).await? {
            // href 속성이 아닌 프로퍼티 - 브라우저가 절대 URL로 해석한 값
            Some(element) => Ok(element
                .property("href")
                .await
                .map_err(|e| cdp_error("href", selector, e))?
                .and_then(|v| v.as_str().map(str::to_string))),
            None => Ok(None),
        }
    }

    async fn inner_html(&self, selector: &str) -> CrawlResult<Option<String>> {
        match self.first(selector).await? {
            Some(element) => element
                .inner_html()
                .await
                .map_err(|e| cdp_error("inner_html", selector, e)),
            None => Ok(None),
        }
    }

    async fn click(&self, selector: &str) -> CrawlResult<()> {
        self.required(selector)
            .await?
            .click()
            .await
            .map_err(|e| cdp_error("click", selector, e))?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> CrawlResult<()> {
        let element = self.required(selector).await?;
        element
            .click()
            .await
            .map_err(|e| cdp_error("focus", selector, e))?
            .type_str(value)
            .await
            .map_err(|e| cdp_error("type", selector, e))?;
        Ok(())
    }

    async fn press_key(&self, selector: &str, key: &str) -> CrawlResult<()> {
        self.required(selector)
            .await?
            .press_key(key)
            .await
            .map_err(|e| cdp_error("press_key", selector, e))?;
        Ok(())
    }

    async fn wait_for_navigation(&self) -> CrawlResult<()> {
        match tokio::time::timeout(self.navigation_timeout, self.page.wait_for_navigation()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(CrawlError::Browser(format!("navigation wait failed: {}", e))),
            Err(_) => Err(CrawlError::Browser(format!(
                "navigation wait timed out after {:?}",
                self.navigation_timeout
            ))),
        }
    }

    async fn close(&self) -> CrawlResult<()> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| CrawlError::Browser(format!("failed to close page: {}", e)))
    }
}

// ============================================================================
// Tests
// ============================================================================
