//! 키워드 배치 실행
//!
//! 배치마다 브라우저 세션을 하나 열고 키워드마다 태스크를 하나씩 띄웁니다.
//! 한 키워드의 실패(패닉 포함)는 해당 키워드의 상태로만 기록되고
//! 다른 키워드나 배치 전체를 중단시키지 않습니다.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{ContentFetcher, CrawlContext, PostExtractor};
use crate::browser::{BrowserLauncher, BrowserSession};
use crate::error::{CrawlError, CrawlResult};

// ============================================================================
// Report Types
// ============================================================================

/// 키워드 하나의 처리 요약
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeywordSummary {
    /// 검색 결과에서 추출된 후보 수
    pub candidates: usize,
    /// 본문까지 저장된 게시글 수
    pub with_content: usize,
    /// 메타데이터만 저장된 게시글 수
    pub metadata_only: usize,
    /// 상세 페이지 이동에 실패한 게시글 수
    pub detail_failures: usize,
}

/// 키워드 최종 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KeywordStatus {
    Completed(KeywordSummary),
    Error { detail: String },
}

impl KeywordStatus {
    fn error(detail: impl Into<String>) -> Self {
        KeywordStatus::Error {
            detail: detail.into(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, KeywordStatus::Completed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordResult {
    pub keyword: String,
    #[serde(flatten)]
    pub status: KeywordStatus,
}

/// 배치 진행 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    Started { keyword: String },
    Finished { keyword: String, status: KeywordStatus },
}

/// 배치 결과 (입력 순서 유지)
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub results: Vec<KeywordResult>,
}

impl BatchReport {
    pub fn status(&self, keyword: &str) -> Option<&KeywordStatus> {
        self.results
            .iter()
            .find(|r| r.keyword == keyword)
            .map(|r| &r.status)
    }

    pub fn completed_count(&self) -> usize {
        self.results.iter().filter(|r| r.status.is_completed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.completed_count()
    }

    /// keyword → status 맵
    pub fn to_map(&self) -> HashMap<String, KeywordStatus> {
        self.results
            .iter()
            .map(|r| (r.keyword.clone(), r.status.clone()))
            .collect()
    }
}

// ============================================================================
// BatchHandle
// ============================================================================

/// 실행 중인 배치 핸들
pub struct BatchHandle {
    id: Uuid,
    events: mpsc::UnboundedReceiver<BatchEvent>,
    cancel: CancellationToken,
    task: JoinHandle<BatchReport>,
}

impl BatchHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 다음 진행 이벤트 (배치가 끝나면 None)
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        self.events.recv().await
    }

    /// 진행 중인 모든 키워드 작업 취소
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 모든 키워드가 끝날 때까지 대기
    pub async fn wait(self) -> CrawlResult<BatchReport> {
        self.task
            .await
            .map_err(|e| CrawlError::TaskFailed(e.to_string()))
    }
}

// ============================================================================
// KeywordBatchRunner
// ============================================================================

/// 키워드 배치 실행기
pub struct KeywordBatchRunner {
    ctx: CrawlContext,
    launcher: Arc<dyn BrowserLauncher>,
}

impl KeywordBatchRunner {
    pub fn new(ctx: CrawlContext, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self { ctx, launcher }
    }

    /// 배치를 실행하고 결과를 기다림
    pub async fn run(&self, keywords: Vec<String>) -> CrawlResult<BatchReport> {
        self.submit(keywords).wait().await
    }

    /// 배치를 백그라운드로 시작
    pub fn submit(&self, keywords: Vec<String>) -> BatchHandle {
        self.submit_with_cancel(keywords, CancellationToken::new())
    }

    /// 외부 취소 토큰과 연결된 배치 시작
    pub fn submit_with_cancel(
        &self,
        keywords: Vec<String>,
        cancel: CancellationToken,
    ) -> BatchHandle {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_batch(
            self.ctx.clone(),
            self.launcher.clone(),
            id,
            dedupe(keywords),
            tx,
            cancel.clone(),
        ));

        BatchHandle {
            id,
            events: rx,
            cancel,
            task,
        }
    }
}

// ============================================================================
// Batch Execution
// ============================================================================

async fn run_batch(
    ctx: CrawlContext,
    launcher: Arc<dyn BrowserLauncher>,
    batch_id: Uuid,
    keywords: Vec<String>,
    events: mpsc::UnboundedSender<BatchEvent>,
    cancel: CancellationToken,
) -> BatchReport {
    tracing::info!(
        "Batch {} started: {} keywords (max concurrency {})",
        batch_id,
        keywords.len(),
        ctx.config.max_concurrency
    );

    let session = match launcher.launch().await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Batch {}: browser launch failed: {}", batch_id, e);
            let status = KeywordStatus::error(format!("browser launch failed: {}", e));
            let results = keywords
                .into_iter()
                .map(|keyword| {
                    let _ = events.send(BatchEvent::Finished {
                        keyword: keyword.clone(),
                        status: status.clone(),
                    });
                    KeywordResult {
                        keyword,
                        status: status.clone(),
                    }
                })
                .collect();
            return BatchReport { batch_id, results };
        }
    };

    let semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrency.max(1)));
    let empty_streak = Arc::new(EmptyStreak::new(ctx.config.empty_alert_threshold));
    let mut tasks = JoinSet::new();

    for (index, keyword) in keywords.iter().enumerate() {
        let ctx = ctx.clone();
        let session = session.clone();
        let semaphore = semaphore.clone();
        let empty_streak = empty_streak.clone();
        let events = events.clone();
        let cancel = cancel.clone();
        let keyword = keyword.clone();

        tasks.spawn(async move {
            let status = AssertUnwindSafe(run_keyword(
                ctx,
                session,
                semaphore,
                empty_streak,
                &keyword,
                &events,
                &cancel,
            ))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                KeywordStatus::error(format!("keyword task panicked: {}", panic_message(panic.as_ref())))
            });

            let _ = events.send(BatchEvent::Finished {
                keyword: keyword.clone(),
                status: status.clone(),
            });
            (index, status)
        });
    }

    let mut statuses: Vec<Option<KeywordStatus>> = vec![None; keywords.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, status)) => statuses[index] = Some(status),
            Err(e) => tracing::error!("Batch {}: keyword task aborted: {}", batch_id, e),
        }
    }

    // 패닉한 태스크가 남긴 페이지도 세션과 함께 정리됨
    if let Err(e) = session.close().await {
        tracing::warn!("Batch {}: failed to close browser session: {}", batch_id, e);
    }

    let results: Vec<KeywordResult> = keywords
        .into_iter()
        .zip(statuses)
        .map(|(keyword, status)| KeywordResult {
            keyword,
            status: status.unwrap_or_else(|| KeywordStatus::error("keyword task aborted")),
        })
        .collect();

    let report = BatchReport { batch_id, results };
    tracing::info!(
        "Batch {} finished: {} completed, {} failed",
        batch_id,
        report.completed_count(),
        report.failed_count()
    );
    report
}

/// 키워드 하나의 파이프라인 (동시 실행 슬롯 획득 → 추출 → 순차 수집)
async fn run_keyword(
    ctx: CrawlContext,
    session: Arc<dyn BrowserSession>,
    semaphore: Arc<Semaphore>,
    empty_streak: Arc<EmptyStreak>,
    keyword: &str,
    events: &mpsc::UnboundedSender<BatchEvent>,
    cancel: &CancellationToken,
) -> KeywordStatus {
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return KeywordStatus::error(CrawlError::Cancelled.to_string()),
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(e) => return KeywordStatus::error(format!("concurrency limiter closed: {}", e)),
        },
    };

    let _ = events.send(BatchEvent::Started {
        keyword: keyword.to_string(),
    });

    match crawl_keyword(&ctx, session.as_ref(), &empty_streak, keyword, cancel).await {
        Ok(summary) => {
            tracing::info!(
                "Keyword '{}' completed: {} candidates, {} with content, {} metadata only",
                keyword,
                summary.candidates,
                summary.with_content,
                summary.metadata_only
            );
            KeywordStatus::Completed(summary)
        }
        Err(e) => {
            tracing::error!("Keyword '{}' failed: {}", keyword, e);
            KeywordStatus::error(e.to_string())
        }
    }
}

async fn crawl_keyword(
    ctx: &CrawlContext,
    session: &dyn BrowserSession,
    empty_streak: &EmptyStreak,
    keyword: &str,
    cancel: &CancellationToken,
) -> CrawlResult<KeywordSummary> {
    let candidates = PostExtractor::new(ctx.clone())
        .extract(session, keyword, cancel)
        .await?;

    if let Some(streak) = empty_streak.record(candidates.is_empty()) {
        tracing::warn!(
            "{} consecutive keywords returned no results (last: '{}'); search selectors may have drifted",
            streak,
            keyword
        );
    }

    let fetcher = ContentFetcher::new(ctx.clone());
    let mut summary = KeywordSummary {
        candidates: candidates.len(),
        ..Default::default()
    };

    for candidate in &candidates {
        let fetched = fetcher
            .fetch_and_store(session, candidate, keyword, cancel)
            .await?;

        if fetched.has_content() {
            summary.with_content += 1;
        } else {
            summary.metadata_only += 1;
        }
        if fetched.detail_error.is_some() {
            summary.detail_failures += 1;
        }
    }

    Ok(summary)
}

/// 연속 빈 검색 결과 카운터 (셀렉터 변경 감지)
///
/// threshold가 0이면 경고하지 않습니다.
struct EmptyStreak {
    count: AtomicUsize,
    threshold: usize,
}

impl EmptyStreak {
    fn new(threshold: usize) -> Self {
        Self {
            count: AtomicUsize::new(0),
            threshold,
        }
    }

    /// 추출 결과 하나를 반영하고, 경고할 때면 현재 연속 횟수를 반환
    fn record(&self, empty: bool) -> Option<usize> {
        if !empty {
            self.count.store(0, Ordering::SeqCst);
            return None;
        }

        let streak = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        (self.threshold > 0 && streak >= self.threshold).then_some(streak)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 중복 제거 (첫 등장 순서 유지, 공백 키워드 제외)
fn dedupe(keywords: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.clone()))
        .collect()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::browser::fixture::{FixtureBrowser, Site};
    use crate::crawler::testing::{context, detail_page, detail_url, search_page, search_url};
    use crate::store::PostGateway;

    fn site_with(keyword: &str, ids: &[&str]) -> Site {
        let cards: Vec<(&str, Option<&str>)> = ids.iter().map(|id| (*id, Some(*id))).collect();
        let mut site = Site::new().page(&search_url(keyword), &search_page(&cards));
        for id in ids {
            let content = format!("content of {}", id);
            site = site.page(&detail_url(id), &detail_page(id, Some(&content)));
        }
        site
    }

    fn keywords(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence_order() {
        let deduped = dedupe(keywords(&["b", "a", " b ", "", "c", "a"]));
        assert_eq!(deduped, keywords(&["b", "a", "c"]));
    }

    #[tokio::test]
    async fn test_failing_keyword_does_not_affect_sibling() {
        let (_dir, store, ctx) = context();
        // "alpha" 검색 페이지 없음 → 이동 실패
        let browser = FixtureBrowser::new(site_with("beta", &["b1", "b2"]));
        let runner = KeywordBatchRunner::new(ctx, Arc::new(browser.clone()));

        let report = runner.run(keywords(&["alpha", "beta"])).await.unwrap();

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].keyword, "alpha");
        assert!(matches!(report.status("alpha"), Some(KeywordStatus::Error { .. })));
        assert_eq!(
            report.status("beta"),
            Some(&KeywordStatus::Completed(KeywordSummary {
                candidates: 2,
                with_content: 2,
                metadata_only: 0,
                detail_failures: 0,
            }))
        );

        let posts = store.list_posts().unwrap();
        assert_eq!(posts.len(), 2);
        assert!(posts.iter().all(|p| p.keyword == "beta"));
        assert!(posts.iter().any(|p| p.content.as_deref() == Some("content of b1")));

        let log = browser.log();
        assert!(log.every_page_closed_once());
        assert_eq!(log.sessions_opened, 1);
        assert!(log.sessions_balanced());
    }

    #[tokio::test]
    async fn test_detail_failure_is_counted_not_fatal() {
        let (_dir, store, ctx) = context();
        let site = Site::new().page(
            &search_url("rust"),
            &search_page(&[("a", Some("A")), ("gone", Some("Gone"))]),
        );
        let site = site.page(&detail_url("a"), &detail_page("a", Some("hello")));
        let browser = FixtureBrowser::new(site);
        let runner = KeywordBatchRunner::new(ctx, Arc::new(browser.clone()));

        let report = runner.run(keywords(&["rust"])).await.unwrap();

        assert_eq!(
            report.status("rust"),
            Some(&KeywordStatus::Completed(KeywordSummary {
                candidates: 2,
                with_content: 1,
                metadata_only: 1,
                detail_failures: 1,
            }))
        );
        assert_eq!(store.list_posts().unwrap().len(), 2);
        assert!(browser.log().every_page_closed_once());
    }

    #[tokio::test]
    async fn test_launch_failure_marks_every_keyword() {
        let (_dir, _store, ctx) = context();
        let browser = FixtureBrowser::new(Site::new());
        browser.fail_launch();
        let runner = KeywordBatchRunner::new(ctx, Arc::new(browser.clone()));

        let report = runner.run(keywords(&["a", "b"])).await.unwrap();

        assert_eq!(report.failed_count(), 2);
        assert!(report
            .results
            .iter()
            .all(|r| matches!(&r.status, KeywordStatus::Error { detail } if detail.contains("launch"))));
        assert_eq!(browser.log().sessions_opened, 0);
    }

    #[tokio::test]
    async fn test_duplicate_keywords_dispatched_once() {
        let (_dir, store, ctx) = context();
        let browser = FixtureBrowser::new(site_with("rust", &["a"]));
        let runner = KeywordBatchRunner::new(ctx, Arc::new(browser.clone()));

        let report = runner.run(keywords(&["rust", "rust"])).await.unwrap();

        assert_eq!(report.results.len(), 1);
        assert_eq!(store.list_posts().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_events_report_start_and_finish() {
        let (_dir, _store, ctx) = context();
        let browser = FixtureBrowser::new(site_with("rust", &["a"]));
        let runner = KeywordBatchRunner::new(ctx, Arc::new(browser));

        let mut handle = runner.submit(keywords(&["rust"]));
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        let report = handle.wait().await.unwrap();

        assert_eq!(
            events[0],
            BatchEvent::Started {
                keyword: "rust".to_string()
            }
        );
        assert!(matches!(
            &events[1],
            BatchEvent::Finished { keyword, status } if keyword == "rust" && status.is_completed()
        ));
        assert_eq!(report.completed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_flight_closes_pages_and_session() {
        let (_dir, _store, ctx) = context();
        let site = site_with("rust", &["a"]).slow(&search_url("rust"), Duration::from_secs(60));
        let browser = FixtureBrowser::new(site);
        let runner = KeywordBatchRunner::new(ctx, Arc::new(browser.clone()));

        let mut handle = runner.submit(keywords(&["rust"]));
        assert!(matches!(handle.next_event().await, Some(BatchEvent::Started { .. })));
        handle.cancel();

        let report = handle.wait().await.unwrap();
        assert_eq!(
            report.status("rust"),
            Some(&KeywordStatus::error(CrawlError::Cancelled.to_string()))
        );

        let log = browser.log();
        assert!(log.every_page_closed_once());
        assert!(log.sessions_balanced());
    }

    #[tokio::test]
    async fn test_concurrency_limit_of_one_still_completes_all() {
        let (_dir, store, mut ctx) = context();
        let mut config = (*ctx.config).clone();
        config.max_concurrency = 1;
        ctx.config = Arc::new(config);

        let site = site_with("one", &["a"]);
        let site = site
            .page(&search_url("two"), &search_page(&[("b", Some("B"))]))
            .page(&detail_url("b"), &detail_page("b", Some("bee")));
        let browser = FixtureBrowser::new(site);
        let runner = KeywordBatchRunner::new(ctx, Arc::new(browser));

        let report = runner.run(keywords(&["one", "two"])).await.unwrap();
        assert_eq!(report.completed_count(), 2);
        assert_eq!(store.list_posts().unwrap().len(), 2);
    }

    /// 검색 페이지마다 10초가 걸리는 두 키워드를 주어진 동시성으로 실행한 시간
    async fn elapsed_with_concurrency(max_concurrency: usize) -> (Duration, BatchReport) {
        let (_dir, _store, mut ctx) = context();
        let mut config = (*ctx.config).clone();
        config.max_concurrency = max_concurrency;
        ctx.config = Arc::new(config);

        let site = site_with("one", &["a"])
            .page(&search_url("two"), &search_page(&[("b", Some("B"))]))
            .page(&detail_url("b"), &detail_page("b", Some("bee")))
            .slow(&search_url("one"), Duration::from_secs(10))
            .slow(&search_url("two"), Duration::from_secs(10));
        let runner = KeywordBatchRunner::new(ctx, Arc::new(FixtureBrowser::new(site)));

        let started = tokio::time::Instant::now();
        let report = runner.run(keywords(&["one", "two"])).await.unwrap();
        (started.elapsed(), report)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit_of_one_runs_keywords_one_at_a_time() {
        let (elapsed, report) = elapsed_with_concurrency(1).await;

        assert_eq!(report.completed_count(), 2);
        assert!(elapsed >= Duration::from_secs(20), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit_of_two_overlaps_keywords() {
        let (elapsed, report) = elapsed_with_concurrency(2).await;

        assert_eq!(report.completed_count(), 2);
        assert!(elapsed >= Duration::from_secs(10), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(20), "elapsed {:?}", elapsed);
    }

    #[test]
    fn test_empty_streak_alerts_at_threshold() {
        let streak = EmptyStreak::new(2);
        assert_eq!(streak.record(true), None);
        assert_eq!(streak.record(true), Some(2));
        assert_eq!(streak.record(true), Some(3));
    }

    #[test]
    fn test_empty_streak_resets_on_results() {
        let streak = EmptyStreak::new(2);
        assert_eq!(streak.record(true), None);
        assert_eq!(streak.record(false), None);
        assert_eq!(streak.record(true), None);
        assert_eq!(streak.record(true), Some(2));
    }

    #[test]
    fn test_empty_streak_threshold_zero_never_alerts() {
        let streak = EmptyStreak::new(0);
        for _ in 0..10 {
            assert_eq!(streak.record(true), None);
        }
    }
}
