//! 테스트용 가짜 브라우저
//!
//! URL → HTML 맵으로 사이트를 흉내 내고, 세션/페이지 열림·닫힘과
//! 모든 조작(클릭, 입력, 키 입력)을 기록합니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{dom, BrowserLauncher, BrowserSession, PageAdapter};
use crate::error::{CrawlError, CrawlResult};

/// 가짜 사이트 정의
#[derive(Debug, Clone, Default)]
pub struct Site {
    pages: HashMap<String, String>,
    delays: HashMap<String, Duration>,
}

impl Site {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    /// 페이지 이동에 지연 추가
    pub fn slow(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }
}

/// 기록된 조작
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Click(String),
    Fill(String, String),
    PressKey(String, String),
    WaitForNavigation,
}

/// 브라우저 사용 기록
#[derive(Debug, Clone, Default)]
pub struct FixtureLog {
    pub sessions_opened: usize,
    pub sessions_closed: usize,
    pub pages_opened: usize,
    /// 페이지 번호 → 닫힌 횟수
    pub page_closes: HashMap<usize, usize>,
    pub navigations: Vec<String>,
    pub actions: Vec<Action>,
}

impl FixtureLog {
    /// 열린 모든 페이지가 정확히 한 번 닫혔는지
    pub fn every_page_closed_once(&self) -> bool {
        self.page_closes.len() == self.pages_opened
            && self.page_closes.values().all(|&count| count == 1)
    }

    /// 모든 세션이 닫혔는지
    pub fn sessions_balanced(&self) -> bool {
        self.sessions_opened == self.sessions_closed
    }

    pub fn clicked(&self, selector: &str) -> bool {
        self.actions
            .iter()
            .any(|a| matches!(a, Action::Click(s) if s == selector))
    }

    pub fn filled(&self, selector: &str) -> Option<&str> {
        self.actions.iter().rev().find_map(|a| match a {
            Action::Fill(s, value) if s == selector => Some(value.as_str()),
            _ => None,
        })
    }
}

struct Shared {
    site: Site,
    log: Mutex<FixtureLog>,
    /// URL → 남은 실패 횟수
    failures: Mutex<HashMap<String, usize>>,
    fail_launch: AtomicBool,
}

impl Shared {
    fn record(&self, f: impl FnOnce(&mut FixtureLog)) {
        if let Ok(mut log) = self.log.lock() {
            f(&mut log);
        }
    }
}

/// 가짜 브라우저 (런처)
#[derive(Clone)]
pub struct FixtureBrowser {
    shared: Arc<Shared>,
}

impl FixtureBrowser {
    pub fn new(site: Site) -> Self {
        Self {
            shared: Arc::new(Shared {
                site,
                log: Mutex::new(FixtureLog::default()),
                failures: Mutex::new(HashMap::new()),
                fail_launch: AtomicBool::new(false),
            }),
        }
    }

    /// 해당 URL로의 다음 n번 이동을 실패시킴
    pub fn fail_next_navigations(&self, url: &str, times: usize) {
        if let Ok(mut failures) = self.shared.failures.lock() {
            failures.insert(url.to_string(), times);
        }
    }

    pub fn fail_launch(&self) {
        self.shared.fail_launch.store(true, Ordering::SeqCst);
    }

    pub fn log(&self) -> FixtureLog {
        self.shared
            .log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrowserLauncher for FixtureBrowser {
    async fn launch(&self) -> CrawlResult<Arc<dyn BrowserSession>> {
        if self.shared.fail_launch.load(Ordering::SeqCst) {
            return Err(CrawlError::Browser("fixture launch failure".to_string()));
        }
        self.shared.record(|log| log.sessions_opened += 1);
        Ok(Arc::new(FixtureSession {
            shared: self.shared.clone(),
        }))
    }
}

struct FixtureSession {
    shared: Arc<Shared>,
}

#[async_trait]
impl BrowserSession for FixtureSession {
    async fn new_page(&self) -> CrawlResult<Box<dyn PageAdapter>> {
        let mut id = 0;
        self.shared.record(|log| {
            id = log.pages_opened;
            log.pages_opened += 1;
        });
        Ok(Box::new(FixturePage {
            id,
            shared: self.shared.clone(),
            current: Mutex::new(None),
        }))
    }

    async fn close(&self) -> CrawlResult<()> {
        self.shared.record(|log| log.sessions_closed += 1);
        Ok(())
    }
}

struct FixturePage {
    id: usize,
    shared: Arc<Shared>,
    current: Mutex<Option<(url::Url, String)>>,
}

impl FixturePage {
    fn query<T>(&self, f: impl FnOnce(&str, Option<&url::Url>) -> CrawlResult<T>) -> CrawlResult<T> {
        let current = self
            .current
            .lock()
            .map_err(|_| CrawlError::Browser("fixture page poisoned".to_string()))?;
        match current.as_ref() {
            Some((url, html)) => f(html, Some(url)),
            None => f("", None),
        }
    }

    fn load(&self, url: &str) -> CrawlResult<()> {
        let html = self
            .shared
            .site
            .pages
            .get(url)
            .ok_or_else(|| CrawlError::navigation(url, "HTTP 404"))?;
        let parsed = url::Url::parse(url).map_err(|e| CrawlError::navigation(url, e))?;
        if let Ok(mut current) = self.current.lock() {
            *current = Some((parsed, html.clone()));
        }
        Ok(())
    }

    fn require(&self, selector: &str) -> CrawlResult<()> {
        if self.query(|html, _| dom::exists(html, selector))? {
            Ok(())
        } else {
            Err(CrawlError::Browser(format!("element `{}` not found", selector)))
        }
    }
}

#[async_trait]
impl PageAdapter for FixturePage {
    async fn navigate(&self, url: &str) -> CrawlResult<()> {
        self.shared.record(|log| log.navigations.push(url.to_string()));

        if let Some(delay) = self.shared.site.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }

        let should_fail = match self.shared.failures.lock() {
            Ok(mut failures) => match failures.get_mut(url) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            },
            Err(_) => false,
        };
        if should_fail {
            return Err(CrawlError::navigation(url, "connection reset"));
        }

        self.load(url)
    }

    async fn attribute_all(&self, selector: &str, name: &str) -> CrawlResult<Vec<Option<String>>> {
        self.query(|html, _| dom::attribute_all(html, selector, name))
    }

    async fn exists(&self, selector: &str) -> CrawlResult<bool> {
        self.query(|html, _| dom::exists(html, selector))
    }

    async fn text(&self, selector: &str) -> CrawlResult<Option<String>> {
        self.query(|html, _| dom::text(html, selector))
    }

    async fn link(&self, selector: &str) -> CrawlResult<Option<String>> {
        self.query(|html, base| dom::link(html, selector, base))
    }

    async fn inner_html(&self, selector: &str) -> CrawlResult<Option<String>> {
        self.query(|html, _| dom::inner_html(html, selector))
    }

    async fn click(&self, selector: &str) -> CrawlResult<()> {
        self.require(selector)?;
        self.shared
            .record(|log| log.actions.push(Action::Click(selector.to_string())));
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> CrawlResult<()> {
        self.require(selector)?;
        self.shared.record(|log| {
            log.actions
                .push(Action::Fill(selector.to_string(), value.to_string()))
        });
        Ok(())
    }

    async fn press_key(&self, selector: &str, key: &str) -> CrawlResult<()> {
        self.require(selector)?;
        self.shared.record(|log| {
            log.actions
                .push(Action::PressKey(selector.to_string(), key.to_string()))
        });
        Ok(())
    }

    async fn wait_for_navigation(&self) -> CrawlResult<()> {
        self.shared
            .record(|log| log.actions.push(Action::WaitForNavigation));
        Ok(())
    }

    async fn close(&self) -> CrawlResult<()> {
        let id = self.id;
        self.shared
            .record(|log| *log.page_closes.entry(id).or_insert(0) += 1);
        Ok(())
    }
}
