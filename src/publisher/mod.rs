//! Publisher 모듈 - 저장된 게시글을 포럼(Discourse)에 재게시
//!
//! 상태 전이:
//! Start → LoggedIn → ComposerOpen → TitleFilled → ContentFilled
//!   → CategorySelected(선택) → TagSelected(선택) → Submitted
//!
//! 로그인/새 토픽/게시 버튼이 없으면 중단하고 (거쳐온 상태를 로그로 남기고 Err 반환),
//! 카테고리/태그 선택기는 없거나 결과가 없으면 건너뜁니다.
//! 어느 경로로 끝나든 페이지와 브라우저 세션은 닫힙니다.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::browser::{close_page, navigate_with_retry, BrowserLauncher, BrowserSession, PageAdapter};
use crate::config::ForumCredentials;
use crate::crawler::CrawlContext;
use crate::error::{Control, CrawlError, CrawlResult};
use crate::pacing::PacingKind;
use crate::store::Post;

/// 포럼 제목 최소 길이
pub const MIN_TITLE_CHARS: usize = 15;

// ============================================================================
// Types
// ============================================================================

/// 게시 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PublishState {
    Start,
    LoggedIn,
    ComposerOpen,
    TitleFilled,
    ContentFilled,
    CategorySelected,
    TagSelected,
    Submitted,
}

/// 게시 결과
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub post_id: i64,
    /// 최종 상태 (성공 시 Submitted)
    pub state: PublishState,
    /// 거쳐온 상태 순서
    pub visited: Vec<PublishState>,
    pub category_selected: bool,
    pub tag_selected: bool,
    /// 실제로 입력된 제목
    pub title: String,
    /// ConvertPost id (게시 후 기록에 실패하면 None)
    pub convert_id: Option<i64>,
}

impl PublishReport {
    fn new(post_id: i64) -> Self {
        Self {
            post_id,
            state: PublishState::Start,
            visited: vec![PublishState::Start],
            category_selected: false,
            tag_selected: false,
            title: String::new(),
            convert_id: None,
        }
    }

    fn advance(&mut self, state: PublishState) {
        tracing::debug!("Publish #{}: {:?} → {:?}", self.post_id, self.state, state);
        self.visited.push(state.clone());
        self.state = state;
    }
}

/// 제목이 최소 길이보다 짧으면 본문 앞부분으로 보충
///
/// `title + " " + content`의 앞 15자를 취하고 앞뒤 공백을 제거합니다.
/// 제목이 비어 있으면 구분 공백 없이 본문만 사용합니다.
pub fn normalize_title(title: &str, content: &str) -> String {
    if title.chars().count() >= MIN_TITLE_CHARS {
        return title.to_string();
    }

    let title = title.trim();
    let content = content.trim_start();
    let joined = if title.is_empty() {
        content.to_string()
    } else {
        format!("{} {}", title, content)
    };
    let prefix: String = joined.chars().take(MIN_TITLE_CHARS).collect();
    prefix.trim().to_string()
}

// ============================================================================
// ForumPublisher
// ============================================================================

/// 게시 진행 중인 id 집합에서 자동으로 제거되는 가드
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<i64>>>,
    post_id: i64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.post_id);
        }
    }
}

/// 포럼 게시기
pub struct ForumPublisher {
    ctx: CrawlContext,
    launcher: Arc<dyn BrowserLauncher>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl ForumPublisher {
    pub fn new(ctx: CrawlContext, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            ctx,
            launcher,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// 게시글 하나를 포럼에 게시
    ///
    /// 원본 Post는 변경하지 않으며, 성공 시 ConvertPost 기록을 남깁니다.
    pub async fn publish(&self, post_id: i64, cancel: &CancellationToken) -> CrawlResult<PublishReport> {
        let credentials = self.ctx.config.credentials.clone().ok_or_else(|| {
            CrawlError::Config("FORUM_USERNAME and FORUM_PASSWORD must be set".to_string())
        })?;

        let post = self
            .ctx
            .store
            .find_post(post_id)
            .map_err(CrawlError::persistence)?
            .ok_or(CrawlError::PostNotFound(post_id))?;

        let _guard = self.acquire(post_id)?;
        tracing::info!("Publishing post #{} ('{}')", post.id, post.title);

        let session = self.launcher.launch().await?;
        let result = self
            .publish_in_session(session.as_ref(), &post, &credentials, cancel)
            .await;
        if let Err(e) = session.close().await {
            tracing::warn!("Failed to close publish session: {}", e);
        }

        let mut report = result?;

        // 토픽은 이미 올라갔으므로 기록 실패는 게시 실패로 보지 않음
        match self.ctx.store.record_conversion(&post, &report.title) {
            Ok(convert_id) => {
                report.convert_id = Some(convert_id);
                tracing::info!("Published post #{} (convert #{})", post.id, convert_id);
            }
            Err(e) => {
                tracing::warn!("Published post #{} but failed to record conversion: {:#}", post.id, e);
            }
        }

        Ok(report)
    }

    fn acquire(&self, post_id: i64) -> CrawlResult<InFlightGuard> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|_| CrawlError::TaskFailed("publish lock poisoned".to_string()))?;
        if !set.insert(post_id) {
            return Err(CrawlError::PublishInProgress(post_id));
        }
        Ok(InFlightGuard {
            in_flight: self.in_flight.clone(),
            post_id,
        })
    }

    async fn publish_in_session(
        &self,
        session: &dyn BrowserSession,
        post: &Post,
        credentials: &ForumCredentials,
        cancel: &CancellationToken,
    ) -> CrawlResult<PublishReport> {
        let page = session.new_page().await?;
        let mut report = PublishReport::new(post.id);

        let result = self
            .drive(page.as_ref(), post, credentials, &mut report, cancel)
            .await;
        close_page(page, "forum").await;

        match result {
            Ok(()) => Ok(report),
            Err(e) => {
                tracing::error!(
                    "Publish #{} aborted after {:?}: {}",
                    post.id,
                    report.visited,
                    e
                );
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        page: &dyn PageAdapter,
        post: &Post,
        credentials: &ForumCredentials,
        report: &mut PublishReport,
        cancel: &CancellationToken,
    ) -> CrawlResult<()> {
        let selectors = &self.ctx.config.forum;

        self.login(page, credentials, cancel).await?;
        report.advance(PublishState::LoggedIn);

        self.open_composer(page, cancel).await?;
        report.advance(PublishState::ComposerOpen);

        let content = post.content.as_deref().unwrap_or("");
        let title = normalize_title(&post.title, content);
        if title != post.title {
            tracing::info!("Adjusted title: {}", title);
        }
        page.fill(&selectors.title_input, &title).await?;
        report.title = title;
        report.advance(PublishState::TitleFilled);
        self.settle(PacingKind::PublishSettle, cancel).await?;

        page.fill(&selectors.content_input, content).await?;
        report.advance(PublishState::ContentFilled);
        self.settle(PacingKind::PublishSettle, cancel).await?;

        if self
            .choose_first(
                page,
                Control::CategoryChooser,
                &selectors.category_chooser,
                &selectors.category_first,
                &post.keyword,
                cancel,
            )
            .await?
        {
            report.category_selected = true;
            report.advance(PublishState::CategorySelected);
        }

        if self
            .choose_first(
                page,
                Control::TagChooser,
                &selectors.tag_chooser,
                &selectors.tag_first,
                &post.keyword,
                cancel,
            )
            .await?
        {
            report.tag_selected = true;
            report.advance(PublishState::TagSelected);
        }

        if !page.exists(&selectors.submit).await? {
            return Err(CrawlError::MissingControl(Control::Submit));
        }
        page.click(&selectors.submit).await?;
        self.settle(PacingKind::PublishPageSettle, cancel).await?;
        report.advance(PublishState::Submitted);

        Ok(())
    }

    /// Start → LoggedIn (로그인 시도는 한 번)
    async fn login(
        &self,
        page: &dyn PageAdapter,
        credentials: &ForumCredentials,
        cancel: &CancellationToken,
    ) -> CrawlResult<()> {
        let config = &self.ctx.config;
        let selectors = &config.forum;

        navigate_with_retry(
            page,
            &config.forum_url,
            config.navigation_retries,
            &self.ctx.pacer,
            cancel,
        )
        .await?;
        self.settle(PacingKind::PublishPageSettle, cancel).await?;

        if !page.exists(&selectors.login_button).await? {
            return Err(CrawlError::MissingControl(Control::Login));
        }
        page.click(&selectors.login_button).await?;
        self.settle(PacingKind::PublishSettle, cancel).await?;

        page.fill(&selectors.username_input, &credentials.username).await?;
        page.fill(&selectors.password_input, &credentials.password).await?;
        page.press_key(&selectors.password_input, "Enter").await?;

        // 로그인 후 전체 이동 없이 갱신만 되는 경우도 있어 실패는 경고로만 남김
        match cancellable(page.wait_for_navigation(), cancel).await {
            Ok(()) => {}
            Err(CrawlError::Cancelled) => return Err(CrawlError::Cancelled),
            Err(e) => tracing::warn!("No navigation after login: {}", e),
        }
        self.settle(PacingKind::PublishPageSettle, cancel).await?;

        tracing::info!("Logged in to {} as {}", config.forum_url, credentials.username);
        Ok(())
    }

    /// LoggedIn → ComposerOpen
    async fn open_composer(&self, page: &dyn PageAdapter, cancel: &CancellationToken) -> CrawlResult<()> {
        let selectors = &self.ctx.config.forum;

        if !page.exists(&selectors.create_topic).await? {
            return Err(CrawlError::MissingControl(Control::CreateTopic));
        }
        page.click(&selectors.create_topic).await?;
        self.settle(PacingKind::PublishSettle, cancel).await?;

        // 작성기가 답글 모드로 열렸을 때만 있는 액션 선택
        if page.exists(&selectors.composer_actions).await? {
            let chosen = async {
                page.click(&selectors.composer_actions).await?;
                page.click(&selectors.composer_create_topic).await
            }
            .await;
            if let Err(e) = chosen {
                tracing::warn!("{} ({}), continuing", Control::ComposerAction, e);
            }
            self.settle(PacingKind::PublishSettle, cancel).await?;
        }

        Ok(())
    }

    /// 선택기를 열고 키워드로 필터링한 뒤 첫 항목 선택
    ///
    /// 선택했으면 true. 선택기가 없거나 결과가 없으면 false (에러 아님).
    async fn choose_first(
        &self,
        page: &dyn PageAdapter,
        control: Control,
        chooser: &str,
        first_item: &str,
        keyword: &str,
        cancel: &CancellationToken,
    ) -> CrawlResult<bool> {
        if !page.exists(chooser).await? {
            tracing::debug!("{}, skipping", control);
            return Ok(false);
        }

        match self.try_choose(page, chooser, first_item, keyword, cancel).await {
            Ok(true) => {
                tracing::info!("Selected first {} match for '{}'", control.name(), keyword);
                Ok(true)
            }
            Ok(false) => {
                tracing::info!("No {} match for '{}', skipping", control.name(), keyword);
                Ok(false)
            }
            Err(CrawlError::Cancelled) => Err(CrawlError::Cancelled),
            Err(e) => {
                tracing::warn!("{} selection failed, skipping: {}", control.name(), e);
                Ok(false)
            }
        }
    }

    async fn try_choose(
        &self,
        page: &dyn PageAdapter,
        chooser: &str,
        first_item: &str,
        keyword: &str,
        cancel: &CancellationToken,
    ) -> CrawlResult<bool> {
        let filter_input = &self.ctx.config.forum.filter_input;

        page.click(chooser).await?;
        self.settle(PacingKind::PublishSettle, cancel).await?;

        if page.exists(filter_input).await? {
            page.fill(filter_input, keyword).await?;
            self.settle(PacingKind::PublishSettle, cancel).await?;
        }

        if !page.exists(first_item).await? {
            return Ok(false);
        }
        page.click(first_item).await?;
        Ok(true)
    }

    async fn settle(&self, kind: PacingKind, cancel: &CancellationToken) -> CrawlResult<()> {
        self.ctx.pacer.wait(kind, cancel).await
    }
}

async fn cancellable<F>(fut: F, cancel: &CancellationToken) -> CrawlResult<()>
where
    F: Future<Output = CrawlResult<()>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CrawlError::Cancelled),
        result = fut => result,
    }
}

// ============================================================================
// Tests
// ============================================================================
