//! Crawler 모듈 - 키워드 검색 → 게시글 추출 → 본문 저장
//!
//! - Extractor: 검색 결과 카드에서 후보 게시글 목록 추출
//! - Fetcher: 후보의 상세 페이지에서 본문을 가져와 2단계로 저장
//! - Batch: 여러 키워드를 독립 파이프라인으로 동시 실행

mod batch;
mod extractor;
mod fetcher;

use std::sync::Arc;

use crate::config::CrawlConfig;
use crate::pacing::Pacer;
use crate::store::PostGateway;

pub use batch::{
    BatchEvent, BatchHandle, BatchReport, KeywordBatchRunner, KeywordResult, KeywordStatus,
    KeywordSummary,
};
pub use extractor::{Candidate, PostExtractor};
pub use fetcher::{ContentFetcher, ExternalPostId, FetchedPost};

/// 파이프라인 공유 컨텍스트
///
/// 브라우저 세션은 여기 두지 않고 실행마다 명시적으로 전달합니다.
#[derive(Clone)]
pub struct CrawlContext {
    pub config: Arc<CrawlConfig>,
    pub store: Arc<dyn PostGateway>,
    pub pacer: Arc<Pacer>,
}

impl CrawlContext {
    pub fn new(config: CrawlConfig, store: Arc<dyn PostGateway>) -> Self {
        let pacer = Arc::new(Pacer::new(config.timings.clone()));
        Self {
            config: Arc::new(config),
            store,
            pacer,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 크롤러 테스트 공용 헬퍼

    use std::sync::Arc;

    use tempfile::TempDir;

    use super::CrawlContext;
    use crate::config::{CrawlConfig, Timings};
    use crate::store::CrawlStore;

    pub const SEARCH_BASE: &str = "https://search.test/search/?q=";

    pub fn search_url(keyword: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(keyword.as_bytes()).collect();
        format!("{}{}", SEARCH_BASE, encoded)
    }

    pub fn detail_url(id: &str) -> String {
        format!("https://search.test/r/test/comments/{}/", id)
    }

    /// 검색 결과 페이지. `None` 제목은 참조가 가리키는 요소가 없는 카드
    pub fn search_page(cards: &[(&str, Option<&str>)]) -> String {
        let mut body = String::new();
        for (id, _) in cards {
            body.push_str(&format!(
                r#"<faceplate-tracker data-testid="search-post" aria-labelledby="search-post-title-{}"></faceplate-tracker>"#,
                id
            ));
        }
        for (id, title) in cards {
            if let Some(title) = title {
                body.push_str(&format!(
                    r#"<a id="search-post-title-{}" href="/r/test/comments/{}/">{}</a>"#,
                    id, id, title
                ));
            }
        }
        format!("<html><body>{}</body></html>", body)
    }

    pub fn detail_page(id: &str, content: Option<&str>) -> String {
        match content {
            Some(content) => format!(
                r#"<html><body><div id="{}-post-rtjson-content"><p>{}</p></div></body></html>"#,
                id, content
            ),
            None => "<html><body><div class=\"removed\">[removed]</div></body></html>".to_string(),
        }
    }

    pub fn context() -> (TempDir, Arc<CrawlStore>, CrawlContext) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(CrawlStore::open(&dir.path().join("crawl.db")).unwrap());
        let config = CrawlConfig {
            search_base_url: SEARCH_BASE.to_string(),
            timings: Timings::immediate(),
            navigation_retries: 1,
            ..Default::default()
        };
        let ctx = CrawlContext::new(config, store.clone());
        (dir, store, ctx)
    }
}
