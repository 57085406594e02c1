//! crawl-forum - 키워드 검색 크롤러 + 포럼 재게시
//!
//! headless 브라우저로 검색 결과 게시글을 수집해 SQLite에 저장하고,
//! 저장된 게시글을 Discourse 포럼에 새 토픽으로 다시 게시합니다.

pub mod browser;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod error;
pub mod pacing;
pub mod publisher;
pub mod store;

// Re-exports
pub use browser::{Backend, BrowserLauncher, BrowserSession, PageAdapter};
pub use config::{get_data_dir, CrawlConfig, ForumCredentials, ForumSelectors, SearchSelectors, Timings};
pub use crawler::{
    BatchEvent, BatchHandle, BatchReport, Candidate, ContentFetcher, CrawlContext, ExternalPostId,
    KeywordBatchRunner, KeywordStatus, KeywordSummary, PostExtractor,
};
pub use error::{Control, CrawlError, CrawlResult};
pub use pacing::{Pacer, PacingKind};
pub use publisher::{normalize_title, ForumPublisher, PublishReport, PublishState};
pub use store::{ConvertPost, CrawlStore, Keyword, NewPost, Post, PostGateway, StoreStats};
