//! Browser 모듈 - 페이지 조작 추상화
//!
//! 크롤러와 게시 로직은 실제 브라우저 대신 `PageAdapter` 트레이트에만 의존합니다.
//! 덕분에 셀렉터 기반 로직을 가짜 DOM으로 테스트할 수 있습니다.
//!
//! - `chromium`: chromiumoxide (CDP) 기반 headless Chrome
//! - `http`: reqwest + scraper 기반 정적 HTML (읽기 전용)

pub mod chromium;
pub mod dom;
pub mod http;

#[cfg(test)]
pub mod fixture;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::CrawlConfig;
use crate::error::{CrawlError, CrawlResult};
use crate::pacing::{PacingKind, Pacer};

pub use chromium::ChromiumLauncher;
pub use http::HttpLauncher;

// ============================================================================
// Traits
// ============================================================================

/// 브라우저 페이지(탭) 조작 인터페이스
///
/// 모든 질의는 셀렉터로 대상을 지정하며, 여러 요소가 맞으면 첫 번째를 사용합니다.
#[async_trait]
pub trait PageAdapter: Send + Sync {
    /// URL로 이동 (DOM 로드까지 대기)
    async fn navigate(&self, url: &str) -> CrawlResult<()>;

    /// 셀렉터에 맞는 모든 요소의 속성값 (문서 순서)
    async fn attribute_all(&self, selector: &str, name: &str) -> CrawlResult<Vec<Option<String>>>;

    /// 요소 존재 여부
    async fn exists(&self, selector: &str) -> CrawlResult<bool>;

    /// 요소의 표시 텍스트
    async fn text(&self, selector: &str) -> CrawlResult<Option<String>>;

    /// 요소의 링크 대상 (절대 URL)
    async fn link(&self, selector: &str) -> CrawlResult<Option<String>>;

    /// 요소의 내부 HTML
    async fn inner_html(&self, selector: &str) -> CrawlResult<Option<String>>;

    async fn click(&self, selector: &str) -> CrawlResult<()>;

    /// 입력 필드에 값 입력
    async fn fill(&self, selector: &str, value: &str) -> CrawlResult<()>;

    /// 요소에 포커스 후 키 입력 (예: "Enter")
    async fn press_key(&self, selector: &str, key: &str) -> CrawlResult<()>;

    /// 진행 중인 페이지 이동이 끝날 때까지 대기
    async fn wait_for_navigation(&self) -> CrawlResult<()>;

    /// 페이지 닫기
    async fn close(&self) -> CrawlResult<()>;
}

/// 브라우저 세션 - 페이지를 열고 마지막에 한 번 닫힘
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn new_page(&self) -> CrawlResult<Box<dyn PageAdapter>>;

    async fn close(&self) -> CrawlResult<()>;
}

/// 브라우저 세션 획득
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> CrawlResult<Arc<dyn BrowserSession>>;
}

// ============================================================================
// Backend
// ============================================================================

/// 브라우저 백엔드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Backend {
    /// headless Chrome (CDP)
    #[default]
    Chromium,
    /// 정적 HTML (JavaScript 미실행, 폼 조작 불가)
    Http,
}

/// 설정에 맞는 런처 생성
pub fn launcher_for(backend: Backend, config: &CrawlConfig) -> Arc<dyn BrowserLauncher> {
    match backend {
        Backend::Chromium => Arc::new(ChromiumLauncher::from_config(config)),
        Backend::Http => Arc::new(HttpLauncher::new(config.timings.navigation_timeout)),
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 취소 가능한 페이지 이동
pub async fn navigate(
    page: &dyn PageAdapter,
    url: &str,
    cancel: &CancellationToken,
) -> CrawlResult<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CrawlError::Cancelled),
        result = page.navigate(url) => result,
    }
}

/// 페이지 이동 + 제한된 재시도
///
/// `NavigationFailure`만 재시도하며, 재시도 사이에는 백오프가 적용됩니다.
pub async fn navigate_with_retry(
    page: &dyn PageAdapter,
    url: &str,
    retries: u32,
    pacer: &Pacer,
    cancel: &CancellationToken,
) -> CrawlResult<()> {
    let mut attempt = 0;
    loop {
        match navigate(page, url, cancel).await {
            Ok(()) => {
                pacer.record_success(PacingKind::NavigationRetry);
                return Ok(());
            }
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                pacer.record_failure(PacingKind::NavigationRetry);
                tracing::warn!(
                    "Navigation failed, retrying ({}/{}): {}",
                    attempt,
                    retries,
                    e
                );
                pacer.wait(PacingKind::NavigationRetry, cancel).await?;
            }
            Err(e) => return Err(e),
        }
    }
}

/// 페이지 닫기 - 실패는 로그만 남김
pub async fn close_page(page: Box<dyn PageAdapter>, label: &str) {
    if let Err(e) = page.close().await {
        tracing::warn!("Failed to close page for {}: {}", label, e);
    }
}

// ============================================================================
// Tests
// ============================================================================
