//! 페이싱 모듈 - 자동화 동작 간 지연
//!
//! 대상 사이트의 rate limit / 봇 탐지를 피하기 위해
//! 동작 종류별로 설정된 시간만큼 대기합니다.
//! 실패가 이어지면 종류별로 지수 백오프를 적용합니다.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::Timings;
use crate::error::{CrawlError, CrawlResult};

/// 백오프 지수 상한 (2^6 = 64배)
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// 대기 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacingKind {
    /// 상세 페이지 탭을 연 직후
    DetailSettle,
    /// 게시글 하나 처리 후 다음 게시글 전
    FetchCooldown,
    /// 게시 흐름의 단계 전환 (드롭다운, 폼)
    PublishSettle,
    /// 게시 흐름의 페이지 이동 후
    PublishPageSettle,
    /// 페이지 이동 재시도 전
    NavigationRetry,
}

/// 페이싱 컨트롤러
///
/// 여러 키워드 작업이 공유하며, 실패 횟수는 종류별로 누적됩니다.
#[derive(Debug)]
pub struct Pacer {
    timings: Timings,
    failures: Mutex<HashMap<PacingKind, u32>>,
}

impl Pacer {
    pub fn new(timings: Timings) -> Self {
        Self {
            timings,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// 설정된 기본 대기 시간
    fn base_delay(&self, kind: PacingKind) -> Duration {
        match kind {
            PacingKind::DetailSettle => self.timings.detail_settle,
            PacingKind::FetchCooldown => self.timings.fetch_cooldown,
            PacingKind::PublishSettle => self.timings.publish_settle,
            PacingKind::PublishPageSettle => self.timings.publish_page_settle,
            PacingKind::NavigationRetry => self.timings.retry_base,
        }
    }

    /// 현재 실패 횟수를 반영한 대기 시간
    pub fn delay_for(&self, kind: PacingKind) -> Duration {
        let base = self.base_delay(kind);
        let failures = self.failure_count(kind).min(MAX_BACKOFF_EXPONENT);

        if failures == 0 {
            return base;
        }

        let scaled = base.saturating_mul(2u32.pow(failures));
        scaled.min(self.timings.max_backoff.max(base))
    }

    pub fn failure_count(&self, kind: PacingKind) -> u32 {
        self.failures
            .lock()
            .map(|map| map.get(&kind).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// 실패 신호 기록 (다음 대기가 두 배로)
    pub fn record_failure(&self, kind: PacingKind) {
        if let Ok(mut map) = self.failures.lock() {
            let count = map.entry(kind).or_insert(0);
            *count = count.saturating_add(1);
            tracing::debug!("Pacing backoff for {:?}: {} failures", kind, count);
        }
    }

    /// 성공 시 백오프 초기화
    pub fn record_success(&self, kind: PacingKind) {
        if let Ok(mut map) = self.failures.lock() {
            map.remove(&kind);
        }
    }

    /// 종류별 대기 (취소 가능)
    pub async fn wait(&self, kind: PacingKind, cancel: &CancellationToken) -> CrawlResult<()> {
        let delay = self.delay_for(kind);
        if delay.is_zero() {
            return if cancel.is_cancelled() {
                Err(CrawlError::Cancelled)
            } else {
                Ok(())
            };
        }

        tracing::trace!("Pacing {:?}: waiting {:?}", kind, delay);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CrawlError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
