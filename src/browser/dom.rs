//! 정적 DOM 질의 - scraper 기반
//!
//! 렌더링된 HTML 문자열에 `PageAdapter`와 같은 의미의 질의를 수행합니다.
//! `scraper::Html`은 Send가 아니므로 호출마다 파싱하고 await 너머로 들고 가지 않습니다.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::error::{CrawlError, CrawlResult};

/// CSS 셀렉터 파싱
pub fn parse_selector(selector: &str) -> CrawlResult<Selector> {
    Selector::parse(selector).map_err(|_| CrawlError::InvalidSelector(selector.to_string()))
}

/// id로 요소를 찾는 셀렉터 (따옴표 이스케이프)
pub fn id_selector(id: &str) -> String {
    let escaped = id.replace('\\', "\\\\").replace('"', "\\\"");
    format!(r#"[id="{}"]"#, escaped)
}

/// 셀렉터에 맞는 모든 요소의 속성값 (문서 순서)
pub fn attribute_all(html: &str, selector: &str, name: &str) -> CrawlResult<Vec<Option<String>>> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);

    Ok(document
        .select(&selector)
        .map(|el| el.value().attr(name).map(str::to_string))
        .collect())
}

pub fn exists(html: &str, selector: &str) -> CrawlResult<bool> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let found = document.select(&selector).next().is_some();
    Ok(found)
}

/// 첫 요소의 표시 텍스트 (공백 정리)
pub fn text(html: &str, selector: &str) -> CrawlResult<Option<String>> {
    with_first(html, selector, |el| extract_text_from_element(&el))
}

/// 첫 요소의 내부 HTML
pub fn inner_html(html: &str, selector: &str) -> CrawlResult<Option<String>> {
    with_first(html, selector, |el| el.inner_html())
}

/// 첫 요소의 href를 base 기준 절대 URL로 변환
pub fn link(html: &str, selector: &str, base: Option<&url::Url>) -> CrawlResult<Option<String>> {
    let href = with_first(html, selector, |el| el.value().attr("href").map(str::to_string))?;

    Ok(href.flatten().and_then(|href| match base {
        Some(base) => base.join(&href).ok().map(|u| u.to_string()),
        None => url::Url::parse(&href).ok().map(|u| u.to_string()),
    }))
}

fn with_first<T>(
    html: &str,
    selector: &str,
    f: impl FnOnce(ElementRef<'_>) -> T,
) -> CrawlResult<Option<T>> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let value = document.select(&selector).next().map(f);
    Ok(value)
}

/// 요소에서 텍스트 추출 (연속 공백 정리)
fn extract_text_from_element(element: &ElementRef<'_>) -> String {
    static WHITESPACE: OnceLock<Option<Regex>> = OnceLock::new();

    let mut text = String::new();
    for node in element.text() {
        let trimmed = node.trim();
        if !trimmed.is_empty() {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(trimmed);
        }
    }

    match WHITESPACE.get_or_init(|| Regex::new(r"\s+").ok()).as_ref() {
        Some(re) => re.replace_all(&text, " ").trim().to_string(),
        None => text.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

// ============================================================================
// Tests
// ============================================================================
