//! 설정 모듈
//!
//! 환경변수(.env 포함)에서 크롤러/게시 설정을 읽습니다.
//! 모든 대기 시간은 여기서 주입되며 코드에 하드코딩하지 않습니다.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.crawl-forum/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".crawl-forum")
}

// ============================================================================
// Selectors
// ============================================================================

/// 검색 사이트 셀렉터
#[derive(Debug, Clone)]
pub struct SearchSelectors {
    /// 검색 결과 카드
    pub result_card: String,
    /// 카드가 제목 요소를 가리키는 참조 속성
    pub reference_attribute: String,
    /// 참조 id 앞에 붙는 고정 접두사
    pub reference_prefix: String,
    /// externalPostId 뒤에 붙는 고정 접미사
    pub post_id_suffix: String,
    /// 본문 컨테이너 (`{id}`가 externalPostId로 치환됨)
    pub content_template: String,
}

impl Default for SearchSelectors {
    fn default() -> Self {
        Self {
            result_card: r#"faceplate-tracker[data-testid="search-post"]"#.to_string(),
            reference_attribute: "aria-labelledby".to_string(),
            reference_prefix: "search-post-title-".to_string(),
            post_id_suffix: "-".to_string(),
            content_template: r#"div[id="{id}post-rtjson-content"] p"#.to_string(),
        }
    }
}

impl SearchSelectors {
    /// externalPostId로 본문 셀렉터 생성
    pub fn content_selector(&self, external_post_id: &str) -> String {
        self.content_template.replace("{id}", external_post_id)
    }
}

/// 포럼(Discourse) 셀렉터
#[derive(Debug, Clone)]
pub struct ForumSelectors {
    pub login_button: String,
    pub username_input: String,
    pub password_input: String,
    pub create_topic: String,
    pub composer_actions: String,
    pub composer_create_topic: String,
    pub title_input: String,
    pub content_input: String,
    pub category_chooser: String,
    pub category_first: String,
    pub tag_chooser: String,
    pub tag_first: String,
    /// 카테고리/태그 선택기 공통 필터 입력
    pub filter_input: String,
    pub submit: String,
}

impl Default for ForumSelectors {
    fn default() -> Self {
        Self {
            login_button: r#"button[class="btn btn-icon-text btn-primary btn-small login-button"]"#
                .to_string(),
            username_input: r#"input[id="login-account-name"]"#.to_string(),
            password_input: r#"input[id="login-account-password"]"#.to_string(),
            create_topic: r#"button[id="create-topic"]"#.to_string(),
            composer_actions: r#"details[class*="composer-actions"]"#.to_string(),
            composer_create_topic: r#"li[data-value="create_topic"]"#.to_string(),
            title_input: r#"input[id="reply-title"]"#.to_string(),
            content_input: r#"textarea[class*="d-editor-input"]"#.to_string(),
            category_chooser: r#"details[class*="category-chooser"]"#.to_string(),
            category_first: r#"div[data-index="0"]"#.to_string(),
            tag_chooser: r#"details[class*="mini-tag-chooser"]"#.to_string(),
            tag_first: r#"li[data-index="0"]"#.to_string(),
            filter_input: r#"input[class*="filter-input"]"#.to_string(),
            submit: r#"button[class*="btn-primary create"]"#.to_string(),
        }
    }
}

// ============================================================================
// Timings
// ============================================================================

/// 대기 시간 설정
#[derive(Debug, Clone)]
pub struct Timings {
    /// 상세 페이지 탭을 연 뒤 이동 전 대기
    pub detail_settle: Duration,
    /// 게시글 하나를 가져온 뒤 다음 게시글까지 대기
    pub fetch_cooldown: Duration,
    /// 게시 단계 간 대기 (드롭다운, 폼 표시)
    pub publish_settle: Duration,
    /// 게시 흐름에서 페이지 이동 후 대기
    pub publish_page_settle: Duration,
    /// 페이지 이동 재시도 기본 대기
    pub retry_base: Duration,
    /// 백오프 상한
    pub max_backoff: Duration,
    /// 페이지 이동 타임아웃
    pub navigation_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            detail_settle: Duration::from_millis(100),
            fetch_cooldown: Duration::from_millis(500),
            publish_settle: Duration::from_millis(1000),
            publish_page_settle: Duration::from_millis(2000),
            retry_base: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
            navigation_timeout: Duration::from_secs(30),
        }
    }
}

impl Timings {
    /// 모든 대기를 0으로 (테스트용)
    pub fn immediate() -> Self {
        Self {
            detail_settle: Duration::ZERO,
            fetch_cooldown: Duration::ZERO,
            publish_settle: Duration::ZERO,
            publish_page_settle: Duration::ZERO,
            retry_base: Duration::ZERO,
            max_backoff: Duration::ZERO,
            navigation_timeout: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// CrawlConfig
// ============================================================================

/// 포럼 계정
#[derive(Clone)]
pub struct ForumCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ForumCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForumCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// 전체 설정
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// 검색 URL (키워드가 URL 인코딩되어 뒤에 붙음)
    pub search_base_url: String,
    pub forum_url: String,
    pub credentials: Option<ForumCredentials>,
    pub search: SearchSelectors,
    pub forum: ForumSelectors,
    pub timings: Timings,
    /// 동시에 실행할 키워드 파이프라인 수
    pub max_concurrency: usize,
    /// 페이지 이동 실패 시 재시도 횟수
    pub navigation_retries: u32,
    /// 연속으로 검색 결과가 비면 셀렉터 변경 경고
    pub empty_alert_threshold: usize,
    pub headless: bool,
    /// 이미 실행 중인 브라우저의 CDP 주소
    pub cdp_url: Option<String>,
    pub db_path: PathBuf,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            search_base_url: "https://www.reddit.com/search/?q=".to_string(),
            forum_url: "https://forum.hidemium.io/".to_string(),
            credentials: None,
            search: SearchSelectors::default(),
            forum: ForumSelectors::default(),
            timings: Timings::default(),
            max_concurrency: 2,
            navigation_retries: 2,
            empty_alert_threshold: 3,
            headless: true,
            cdp_url: None,
            db_path: get_data_dir().join("crawl.db"),
        }
    }
}

impl CrawlConfig {
    /// 환경변수에서 설정 로드
    ///
    /// 값이 없으면 기본값을 사용하고, 형식이 잘못되면 에러를 반환합니다.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = env_string("CRAWL_SEARCH_URL") {
            config.search_base_url = url;
        }
        if let Some(url) = env_string("CRAWL_FORUM_URL") {
            config.forum_url = url;
        }
        if let (Some(username), Some(password)) =
            (env_string("FORUM_USERNAME"), env_string("FORUM_PASSWORD"))
        {
            config.credentials = Some(ForumCredentials { username, password });
        }

        if let Some(n) = env_parse::<usize>("CRAWL_MAX_CONCURRENCY")? {
            config.max_concurrency = n;
        }
        if let Some(n) = env_parse::<u32>("CRAWL_NAV_RETRIES")? {
            config.navigation_retries = n;
        }
        if let Some(n) = env_parse::<usize>("CRAWL_EMPTY_ALERT_THRESHOLD")? {
            config.empty_alert_threshold = n;
        }
        if let Some(headless) = env_parse::<bool>("CRAWL_HEADLESS")? {
            config.headless = headless;
        }
        config.cdp_url = env_string("CRAWL_CDP_URL");
        if let Some(path) = env_string("CRAWL_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        let t = &mut config.timings;
        if let Some(ms) = env_parse::<u64>("CRAWL_DETAIL_SETTLE_MS")? {
            t.detail_settle = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("CRAWL_FETCH_COOLDOWN_MS")? {
            t.fetch_cooldown = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("CRAWL_PUBLISH_SETTLE_MS")? {
            t.publish_settle = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("CRAWL_PUBLISH_PAGE_SETTLE_MS")? {
            t.publish_page_settle = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("CRAWL_MAX_BACKOFF_MS")? {
            t.max_backoff = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("CRAWL_NAV_TIMEOUT_SECS")? {
            t.navigation_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            bail!("CRAWL_MAX_CONCURRENCY must be at least 1");
        }
        if self.timings.navigation_timeout.is_zero() {
            bail!("CRAWL_NAV_TIMEOUT_SECS must be greater than 0");
        }
        url::Url::parse(&self.search_base_url)
            .with_context(|| format!("Invalid search URL: {}", self.search_base_url))?;
        url::Url::parse(&self.forum_url)
            .with_context(|| format!("Invalid forum URL: {}", self.forum_url))?;
        Ok(())
    }

    /// 키워드 검색 URL 생성
    pub fn search_url(&self, keyword: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(keyword.as_bytes()).collect();
        format!("{}{}", self.search_base_url, encoded)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", key, raw, e)),
        None => Ok(None),
    }
}

// ============================================================================
// Tests
// ============================================================================
