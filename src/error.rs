//! 에러 타입 - 크롤링/게시 파이프라인 공통
//!
//! 저장소와 CLI 계층은 `anyhow::Result`를 사용하고,
//! 브라우저 자동화 계층은 아래의 `CrawlError`로 실패 원인을 구분합니다.

use std::fmt;

use thiserror::Error;

/// 파이프라인 결과 타입
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;

// ============================================================================
// Control
// ============================================================================

/// 포럼 게시 과정에서 찾아야 하는 UI 컨트롤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    /// 로그인 버튼
    Login,
    /// "새 토픽" 버튼
    CreateTopic,
    /// 작성기 액션 선택 (선택 사항)
    ComposerAction,
    /// 카테고리 선택기 (선택 사항)
    CategoryChooser,
    /// 태그 선택기 (선택 사항)
    TagChooser,
    /// 게시 버튼
    Submit,
}

impl Control {
    /// 없으면 게시를 중단해야 하는 컨트롤인지 여부
    pub fn is_fatal(self) -> bool {
        matches!(self, Control::Login | Control::CreateTopic | Control::Submit)
    }

    pub fn name(self) -> &'static str {
        match self {
            Control::Login => "login",
            Control::CreateTopic => "create topic",
            Control::ComposerAction => "composer action",
            Control::CategoryChooser => "category chooser",
            Control::TagChooser => "tag chooser",
            Control::Submit => "submit",
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} control missing", self.name())
    }
}

// ============================================================================
// CrawlError
// ============================================================================

/// 크롤링/게시 에러
///
/// 검색 결과가 비어있는 경우(ExtractionEmpty)는 에러가 아니라
/// 정상 결과로 취급하므로 여기에 포함되지 않습니다.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// 페이지 로드 실패 (네트워크, 타임아웃)
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// 게시 중 필요한 UI 요소가 없음
    #[error("{0}")]
    MissingControl(Control),

    #[error("invalid selector `{0}`")]
    InvalidSelector(String),

    /// 브라우저(CDP) 자체 오류
    #[error("browser error: {0}")]
    Browser(String),

    /// 저장소 읽기/쓰기 실패
    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("post #{0} not found")]
    PostNotFound(i64),

    #[error("post #{0} is already being published")]
    PublishInProgress(i64),

    #[error("configuration error: {0}")]
    Config(String),

    /// 현재 브라우저 백엔드가 지원하지 않는 동작
    #[error("{0} is not supported by this browser backend")]
    Unsupported(&'static str),

    /// 작업 태스크가 패닉 등으로 비정상 종료
    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl CrawlError {
    /// 저장소(anyhow) 에러를 파이프라인 에러로 변환
    pub fn persistence(err: anyhow::Error) -> Self {
        CrawlError::Persistence(format!("{:#}", err))
    }

    pub fn navigation(url: &str, reason: impl fmt::Display) -> Self {
        CrawlError::Navigation {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// 재시도 가치가 있는 에러인지 여부
    pub fn is_retryable(&self) -> bool {
        matches!(self, CrawlError::Navigation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_severity() {
        assert!(Control::Login.is_fatal());
        assert!(Control::CreateTopic.is_fatal());
        assert!(Control::Submit.is_fatal());
        assert!(!Control::CategoryChooser.is_fatal());
        assert!(!Control::TagChooser.is_fatal());
        assert!(!Control::ComposerAction.is_fatal());
    }

    #[test]
    fn test_missing_control_message() {
        let err = CrawlError::MissingControl(Control::Login);
        assert_eq!(err.to_string(), "login control missing");
    }

    #[test]
    fn test_persistence_keeps_context_chain() {
        let err = anyhow::anyhow!("disk full").context("Failed to insert post");
        let converted = CrawlError::persistence(err);
        assert_eq!(
            converted.to_string(),
            "persistence failure: Failed to insert post: disk full"
        );
    }

    #[test]
    fn test_only_navigation_is_retryable() {
        assert!(CrawlError::navigation("https://example.com", "timeout").is_retryable());
        assert!(!CrawlError::Cancelled.is_retryable());
        assert!(!CrawlError::MissingControl(Control::Submit).is_retryable());
    }
}
