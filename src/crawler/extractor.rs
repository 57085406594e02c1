//! 검색 결과 추출
//!
//! 검색 결과 카드마다 `aria-labelledby` 참조를 따라가
//! 제목 요소의 텍스트와 링크를 읽습니다.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::CrawlContext;
use crate::browser::{close_page, dom, navigate_with_retry, BrowserSession, PageAdapter};
use crate::error::CrawlResult;

/// 본문을 가져오기 전의 후보 게시글
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    /// 카드의 참조 속성값 (예: "search-post-title-t3_abc")
    pub external_ref: String,
    pub title: String,
    pub link: String,
}

/// 검색 결과 추출기
pub struct PostExtractor {
    ctx: CrawlContext,
}

impl PostExtractor {
    pub fn new(ctx: CrawlContext) -> Self {
        Self { ctx }
    }

    /// 새 페이지에서 키워드 검색 후 후보 추출 (페이지는 항상 닫힘)
    pub async fn extract(
        &self,
        session: &dyn BrowserSession,
        keyword: &str,
        cancel: &CancellationToken,
    ) -> CrawlResult<Vec<Candidate>> {
        let page = session.new_page().await?;
        let result = self.extract_on(page.as_ref(), keyword, cancel).await;
        close_page(page, "search").await;
        result
    }

    /// 주어진 페이지에서 후보 추출
    ///
    /// 결과 순서는 사이트의 관련도 순서 그대로입니다.
    /// 참조가 없거나 해석되지 않는 카드는 조용히 제외합니다.
    pub async fn extract_on(
        &self,
        page: &dyn PageAdapter,
        keyword: &str,
        cancel: &CancellationToken,
    ) -> CrawlResult<Vec<Candidate>> {
        let config = &self.ctx.config;
        let url = config.search_url(keyword);
        tracing::info!("Searching '{}': {}", keyword, url);

        navigate_with_retry(
            page,
            &url,
            config.navigation_retries,
            &self.ctx.pacer,
            cancel,
        )
        .await?;

        let selectors = &config.search;
        let references = page
            .attribute_all(&selectors.result_card, &selectors.reference_attribute)
            .await?;
        let card_count = references.len();

        let mut candidates = Vec::with_capacity(card_count);
        for reference in references {
            let Some(reference) = reference.filter(|r| !r.trim().is_empty()) else {
                tracing::debug!("Skipping search card without reference");
                continue;
            };

            let target = dom::id_selector(&reference);
            let Some(link) = page.link(&target).await? else {
                tracing::debug!("Reference '{}' did not resolve, skipping", reference);
                continue;
            };
            let title = page.text(&target).await?.unwrap_or_default();

            candidates.push(Candidate {
                external_ref: reference,
                title,
                link,
            });
        }

        if candidates.is_empty() {
            tracing::warn!(
                "No candidates for '{}' ({} cards matched); search markup may have changed",
                keyword,
                card_count
            );
        } else {
            tracing::info!(
                "Found {} candidates for '{}' ({} cards)",
                candidates.len(),
                keyword,
                card_count
            );
        }

        Ok(candidates)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fixture::{FixtureBrowser, Site};
    use crate::browser::BrowserLauncher;
    use crate::crawler::testing::{context, search_page, search_url};
    use crate::error::CrawlError;

    #[tokio::test]
    async fn test_extract_keeps_dom_order() {
        let (_dir, _store, ctx) = context();
        let html = search_page(&[("c", Some("Third")), ("a", Some("First")), ("b", Some("Second"))]);
        let browser = FixtureBrowser::new(Site::new().page(&search_url("rust"), &html));
        let session = browser.launch().await.unwrap();

        let candidates = PostExtractor::new(ctx)
            .extract(session.as_ref(), "rust", &CancellationToken::new())
            .await
            .unwrap();

        let titles: Vec<&str> = candidates.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Third", "First", "Second"]);
        assert_eq!(candidates[0].external_ref, "search-post-title-c");
        assert_eq!(candidates[0].link, "https://search.test/r/test/comments/c/");
    }

    #[tokio::test]
    async fn test_unresolvable_cards_are_dropped() {
        let (_dir, _store, ctx) = context();
        let html = search_page(&[
            ("a", Some("First")),
            ("ghost", None),
            ("b", Some("Second")),
        ]);
        let browser = FixtureBrowser::new(Site::new().page(&search_url("rust"), &html));
        let session = browser.launch().await.unwrap();

        let candidates = PostExtractor::new(ctx)
            .extract(session.as_ref(), "rust", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.external_ref != "search-post-title-ghost"));
    }

    #[tokio::test]
    async fn test_card_without_reference_is_dropped() {
        let (_dir, _store, ctx) = context();
        let html = r#"<html><body>
            <faceplate-tracker data-testid="search-post"></faceplate-tracker>
            <faceplate-tracker data-testid="search-post" aria-labelledby="search-post-title-a"></faceplate-tracker>
            <a id="search-post-title-a" href="/r/test/comments/a/">Only</a>
        </body></html>"#;
        let browser = FixtureBrowser::new(Site::new().page(&search_url("rust"), html));
        let session = browser.launch().await.unwrap();

        let candidates = PostExtractor::new(ctx)
            .extract(session.as_ref(), "rust", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Only");
    }

    #[tokio::test]
    async fn test_changed_markup_yields_empty_not_error() {
        let (_dir, _store, ctx) = context();
        let browser = FixtureBrowser::new(
            Site::new().page(&search_url("rust"), "<html><body><div>redesigned</div></body></html>"),
        );
        let session = browser.launch().await.unwrap();

        let candidates = PostExtractor::new(ctx)
            .extract(session.as_ref(), "rust", &CancellationToken::new())
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_search_page_closed_on_navigation_failure() {
        let (_dir, _store, ctx) = context();
        let browser = FixtureBrowser::new(Site::new());
        let session = browser.launch().await.unwrap();

        let result = PostExtractor::new(ctx)
            .extract(session.as_ref(), "rust", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(CrawlError::Navigation { .. })));
        let log = browser.log();
        assert_eq!(log.pages_opened, 1);
        assert!(log.every_page_closed_once());
    }
}
