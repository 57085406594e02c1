//! 상세 페이지 본문 수집
//!
//! 1. 메타데이터만으로 먼저 저장 (중간에 죽어도 행이 남음)
//! 2. 새 탭에서 상세 페이지를 열어 본문 컨테이너를 찾음
//! 3. 찾으면 본문으로 한 번 더 갱신, 없으면 메타데이터만 남김

use std::fmt;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::{Candidate, CrawlContext};
use crate::browser::{close_page, navigate_with_retry, BrowserSession, PageAdapter};
use crate::config::SearchSelectors;
use crate::error::{CrawlError, CrawlResult};
use crate::pacing::PacingKind;
use crate::store::{NewPost, Post};

// ============================================================================
// ExternalPostId
// ============================================================================

/// 검색 카드 참조에서 파생된 게시글 ID
///
/// 원시 참조 문자열에서만 만들 수 있으므로 파생이 두 번 적용될 수 없습니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalPostId(String);

impl ExternalPostId {
    /// 접두사를 제거하고 접미사를 붙임
    ///
    /// `"search-post-title-abc123"` → `"abc123-"`
    pub fn from_reference(reference: &str, selectors: &SearchSelectors) -> Self {
        let stem = reference
            .strip_prefix(selectors.reference_prefix.as_str())
            .unwrap_or(reference);
        Self(format!("{}{}", stem, selectors.post_id_suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalPostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// ContentFetcher
// ============================================================================

/// 저장 결과
#[derive(Debug, Clone)]
pub struct FetchedPost {
    pub post: Post,
    /// 상세 페이지를 열지 못한 경우 그 이유 (게시글은 메타데이터만 남음)
    pub detail_error: Option<String>,
}

impl FetchedPost {
    pub fn has_content(&self) -> bool {
        self.post.content.is_some()
    }
}

/// 본문 수집기
pub struct ContentFetcher {
    ctx: CrawlContext,
}

impl ContentFetcher {
    pub fn new(ctx: CrawlContext) -> Self {
        Self { ctx }
    }

    /// 후보를 저장하고 상세 페이지 본문으로 갱신
    ///
    /// 본문 컨테이너가 없으면 content가 None인 채로 반환합니다 (에러 아님).
    /// 저장소 실패와 취소만 에러로 전파됩니다.
    pub async fn fetch_and_store(
        &self,
        session: &dyn BrowserSession,
        candidate: &Candidate,
        keyword: &str,
        cancel: &CancellationToken,
    ) -> CrawlResult<FetchedPost> {
        let external_post_id =
            ExternalPostId::from_reference(&candidate.external_ref, &self.ctx.config.search);

        // 1단계: 메타데이터 저장
        let new_post = NewPost {
            keyword: keyword.to_string(),
            external_post_id: external_post_id.to_string(),
            title: candidate.title.clone(),
            link: candidate.link.clone(),
        };
        let id = self
            .ctx
            .store
            .create_post(new_post)
            .map_err(CrawlError::persistence)?;

        let mut post = Post {
            id,
            keyword: keyword.to_string(),
            external_post_id: external_post_id.to_string(),
            title: candidate.title.clone(),
            link: candidate.link.clone(),
            content: None,
            created_at: Utc::now(),
        };

        // 2단계: 상세 페이지 (탭은 항상 닫힘)
        let page = session.new_page().await?;
        let loaded = self.load_content(page.as_ref(), &post, &external_post_id, cancel).await;
        close_page(page, &post.link).await;

        let mut detail_error = None;
        match loaded {
            Ok(Some(content)) => {
                post.content = Some(content);
                self.ctx
                    .store
                    .update_post(&post)
                    .map_err(CrawlError::persistence)?;
                tracing::debug!("Stored content for post #{} ({})", post.id, external_post_id);
            }
            Ok(None) => {
                tracing::debug!(
                    "No content container for post #{} ({}), keeping metadata only",
                    post.id,
                    external_post_id
                );
            }
            Err(CrawlError::Cancelled) => return Err(CrawlError::Cancelled),
            Err(e) => {
                tracing::warn!("Detail page failed for {}: {}", post.link, e);
                detail_error = Some(e.to_string());
            }
        }

        // 다음 후보 전 쿨다운
        self.ctx.pacer.wait(PacingKind::FetchCooldown, cancel).await?;

        Ok(FetchedPost { post, detail_error })
    }

    async fn load_content(
        &self,
        page: &dyn PageAdapter,
        post: &Post,
        external_post_id: &ExternalPostId,
        cancel: &CancellationToken,
    ) -> CrawlResult<Option<String>> {
        let config = &self.ctx.config;

        // 새 탭의 클라이언트 렌더링이 자리 잡을 때까지
        self.ctx.pacer.wait(PacingKind::DetailSettle, cancel).await?;

        navigate_with_retry(
            page,
            &post.link,
            config.navigation_retries,
            &self.ctx.pacer,
            cancel,
        )
        .await?;

        let selector = config.search.content_selector(external_post_id.as_str());
        let content = page.inner_html(&selector).await?;
        Ok(content.map(|html| html.trim().to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================
