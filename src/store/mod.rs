//! Store 모듈 - 크롤링 결과 저장소
//!
//! - Keyword: 크롤링할 검색어
//! - Post: 검색으로 찾은 게시글 (메타데이터 → 본문 2단계 저장)
//! - ConvertPost: 포럼에 재게시 완료된 게시글
//!
//! 파이프라인은 `PostGateway` 트레이트만 알고,
//! 실제 구현은 SQLite 기반 `CrawlStore`입니다.

mod sqlite;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use sqlite::{CrawlStore, StoreStats};

// ============================================================================
// Types
// ============================================================================

/// 검색 키워드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub id: i64,
    pub name: String,
}

/// 저장된 게시글
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    /// 이 게시글을 찾은 키워드 (정규화하지 않음)
    pub keyword: String,
    pub external_post_id: String,
    pub title: String,
    pub link: String,
    /// 본문 HTML. 상세 페이지에 본문이 없으면 계속 None
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 새 게시글 입력용 구조체 (메타데이터만)
#[derive(Debug, Clone)]
pub struct NewPost {
    pub keyword: String,
    pub external_post_id: String,
    pub title: String,
    pub link: String,
}

/// 재게시 완료된 게시글
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertPost {
    pub id: i64,
    pub keyword: String,
    pub external_post_id: String,
    /// 실제로 포럼에 입력된 제목 (보정 후)
    pub title: String,
    pub content: String,
    pub source_post_id: i64,
    pub published_at: DateTime<Utc>,
}

// ============================================================================
// PostGateway Trait
// ============================================================================

/// 게시글 저장소 인터페이스
///
/// 크롤링 파이프라인(쓰기)과 게시 흐름(읽기)이 공유합니다.
/// 행 단위로 독립적이라 키워드 간 조율이 필요 없습니다.
pub trait PostGateway: Send + Sync {
    /// 메타데이터만 있는 게시글 저장, 새 ID 반환
    fn create_post(&self, post: NewPost) -> Result<i64>;

    fn find_post(&self, id: i64) -> Result<Option<Post>>;

    fn list_posts(&self) -> Result<Vec<Post>>;

    /// 게시글 갱신 (본문 채우기)
    fn update_post(&self, post: &Post) -> Result<()>;

    /// 여러 게시글 삭제, 삭제된 행 수 반환
    fn delete_posts(&self, ids: &[i64]) -> Result<usize>;

    /// 재게시 기록 저장
    fn record_conversion(&self, post: &Post, published_title: &str) -> Result<i64>;
}
