//! CLI 모듈
//!
//! crawl-forum CLI 명령어 정의 및 구현

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::browser::{launcher_for, Backend};
use crate::config::CrawlConfig;
use crate::crawler::{BatchEvent, CrawlContext, KeywordBatchRunner, KeywordStatus};
use crate::publisher::ForumPublisher;
use crate::store::{CrawlStore, PostGateway};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "crawl-forum")]
#[command(version, about = "키워드 검색 크롤러 + 포럼 재게시", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 검색 키워드 관리
    Keyword {
        #[command(subcommand)]
        action: KeywordAction,
    },

    /// 키워드 검색 결과 크롤링
    Crawl {
        /// 크롤링할 키워드 (여러 개 가능)
        keywords: Vec<String>,

        /// 저장된 모든 키워드 크롤링
        #[arg(short, long)]
        all_keywords: bool,

        /// 동시 실행 키워드 수 (CRAWL_MAX_CONCURRENCY 대신)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// 브라우저 백엔드
        #[arg(short, long, value_enum, default_value = "chromium")]
        backend: Backend,

        /// 브라우저 창 표시
        #[arg(long)]
        headful: bool,

        /// 결과를 JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 저장된 게시글 관리
    Posts {
        #[command(subcommand)]
        action: PostsAction,
    },

    /// 게시글을 포럼에 게시
    Publish {
        /// 게시할 게시글 ID
        #[arg(short, long)]
        id: i64,

        /// 브라우저 창 표시
        #[arg(long)]
        headful: bool,
    },

    /// 상태 확인
    Status,
}

#[derive(Subcommand)]
pub enum KeywordAction {
    /// 키워드 추가
    Add { name: String },

    /// 키워드 목록
    List,

    /// 키워드 이름 변경
    Rename { id: i64, name: String },

    /// 키워드 삭제
    Delete { id: i64 },
}

#[derive(Subcommand)]
pub enum PostsAction {
    /// 게시글 목록
    List {
        /// 키워드 필터
        #[arg(short, long)]
        keyword: Option<String>,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 게시글 삭제
    Delete {
        /// 삭제할 게시글 ID (여러 개 가능)
        #[arg(required = true)]
        ids: Vec<i64>,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Keyword { action } => cmd_keyword(action).await,
        Commands::Crawl {
            keywords,
            all_keywords,
            concurrency,
            backend,
            headful,
            json,
        } => cmd_crawl(keywords, all_keywords, concurrency, backend, headful, json).await,
        Commands::Posts { action } => cmd_posts(action).await,
        Commands::Publish { id, headful } => cmd_publish(id, headful).await,
        Commands::Status => cmd_status().await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 키워드 명령어 (keyword)
async fn cmd_keyword(action: KeywordAction) -> Result<()> {
    let config = CrawlConfig::from_env().context("설정 로드 실패")?;
    let store = open_store(&config)?;

    match action {
        KeywordAction::Add { name } => {
            let keyword = store.add_keyword(&name).context("키워드 추가 실패")?;
            println!("[OK] 키워드 추가됨: #{} {}", keyword.id, keyword.name);
        }
        KeywordAction::List => {
            let keywords = store.list_keywords().context("키워드 목록 조회 실패")?;
            if keywords.is_empty() {
                println!("[!] 저장된 키워드가 없습니다.");
                return Ok(());
            }
            println!("[OK] 키워드 ({} 건):\n", keywords.len());
            for keyword in keywords {
                println!("  #{:<4} {}", keyword.id, keyword.name);
            }
        }
        KeywordAction::Rename { id, name } => {
            if store.rename_keyword(id, &name).context("키워드 변경 실패")? {
                println!("[OK] 키워드 #{} → {}", id, name.trim());
            } else {
                println!("[!] ID {}인 키워드를 찾을 수 없습니다", id);
            }
        }
        KeywordAction::Delete { id } => {
            if store.delete_keyword(id).context("키워드 삭제 실패")? {
                println!("[OK] 키워드 #{} 삭제됨", id);
            } else {
                println!("[!] ID {}인 키워드를 찾을 수 없습니다", id);
            }
        }
    }

    Ok(())
}

/// 크롤링 명령어 (crawl)
///
/// 키워드마다 검색 → 후보 추출 → 상세 페이지 본문 저장을 실행합니다.
async fn cmd_crawl(
    mut keywords: Vec<String>,
    all_keywords: bool,
    concurrency: Option<usize>,
    backend: Backend,
    headful: bool,
    json: bool,
) -> Result<()> {
    let mut config = CrawlConfig::from_env().context("설정 로드 실패")?;
    if let Some(n) = concurrency {
        config.max_concurrency = n;
    }
    if headful {
        config.headless = false;
    }
    config.validate()?;

    let store = open_store(&config)?;
    if all_keywords {
        let saved = store.list_keywords().context("키워드 목록 조회 실패")?;
        keywords.extend(saved.into_iter().map(|k| k.name));
    }
    if keywords.is_empty() {
        bail!("크롤링할 키워드를 지정하거나 --all-keywords를 사용하세요");
    }

    let launcher = launcher_for(backend, &config);
    let ctx = CrawlContext::new(config, Arc::new(store));
    let runner = KeywordBatchRunner::new(ctx, launcher);

    let cancel = cancel_on_ctrl_c();
    let mut handle = runner.submit_with_cancel(keywords, cancel);

    if !json {
        println!("[*] 배치 {} 시작", handle.id());
    }

    while let Some(event) = handle.next_event().await {
        if json {
            continue;
        }
        match event {
            BatchEvent::Started { keyword } => println!("[*] '{}' 검색 중...", keyword),
            BatchEvent::Finished { keyword, status } => match status {
                KeywordStatus::Completed(summary) => println!(
                    "[OK] '{}': 후보 {}, 본문 {}, 메타데이터만 {}",
                    keyword, summary.candidates, summary.with_content, summary.metadata_only
                ),
                KeywordStatus::Error { detail } => println!("[!] '{}' 실패: {}", keyword, detail),
            },
        }
    }

    let report = handle.wait().await.context("배치 실행 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!(
            "[OK] 완료: 성공 {}, 실패 {}",
            report.completed_count(),
            report.failed_count()
        );
    }

    Ok(())
}

/// 게시글 명령어 (posts)
async fn cmd_posts(action: PostsAction) -> Result<()> {
    let config = CrawlConfig::from_env().context("설정 로드 실패")?;
    let store = open_store(&config)?;

    match action {
        PostsAction::List { keyword, limit } => {
            let posts = match keyword {
                Some(ref keyword) => store
                    .posts_by_keyword(keyword, limit)
                    .context("게시글 조회 실패")?,
                None => {
                    let mut posts = store.list_posts().context("게시글 조회 실패")?;
                    posts.reverse();
                    posts.truncate(limit);
                    posts
                }
            };

            if posts.is_empty() {
                println!("[!] 저장된 게시글이 없습니다.");
                return Ok(());
            }

            println!("[OK] 저장된 게시글 ({} 건):\n", posts.len());
            for post in posts {
                println!("  #{:<4} [{}] {}", post.id, post.keyword, truncate_text(&post.title, 50));
                println!("        URL: {}", post.link);
                let content = match post.content {
                    Some(ref content) => format_bytes(content.len()),
                    None => "본문 없음".to_string(),
                };
                println!(
                    "        {} | {}",
                    post.created_at.format("%Y-%m-%d %H:%M"),
                    content
                );
                println!();
            }
        }
        PostsAction::Delete { ids } => {
            let deleted = store.delete_posts(&ids).context("게시글 삭제 실패")?;
            if deleted > 0 {
                println!("[OK] 게시글 {} 건 삭제됨", deleted);
            } else {
                println!("[!] 삭제할 게시글을 찾을 수 없습니다");
            }
        }
    }

    Ok(())
}

/// 게시 명령어 (publish)
///
/// 저장된 게시글 하나를 포럼에 로그인하여 새 토픽으로 게시합니다.
async fn cmd_publish(id: i64, headful: bool) -> Result<()> {
    let mut config = CrawlConfig::from_env().context("설정 로드 실패")?;
    if headful {
        config.headless = false;
    }

    let store = open_store(&config)?;
    let launcher = launcher_for(Backend::Chromium, &config);
    let forum_url = config.forum_url.clone();
    let ctx = CrawlContext::new(config, Arc::new(store));
    let publisher = ForumPublisher::new(ctx, launcher);

    println!("[*] 게시글 #{} 게시 중: {}", id, forum_url);

    let cancel = cancel_on_ctrl_c();
    let report = publisher.publish(id, &cancel).await.context("게시 실패")?;

    println!("[OK] 게시 완료: {}", report.title);
    println!(
        "     카테고리: {}, 태그: {}",
        if report.category_selected { "선택됨" } else { "건너뜀" },
        if report.tag_selected { "선택됨" } else { "건너뜀" }
    );
    if report.convert_id.is_none() {
        println!("[!] 게시 기록 저장 실패 (토픽은 게시됨, 다시 게시하지 마세요)");
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status() -> Result<()> {
    println!("crawl-forum v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let config = CrawlConfig::from_env().context("설정 로드 실패")?;
    println!("[*] 검색 URL: {}", config.search_base_url);
    println!("[*] 포럼 URL: {}", config.forum_url);
    println!("[*] 동시 실행: {}", config.max_concurrency);

    match config.credentials {
        Some(ref creds) => println!("[OK] 포럼 계정: {}", creds.username),
        None => {
            println!("[!] 포럼 계정: 미설정");
            println!("    설정: export FORUM_USERNAME=... FORUM_PASSWORD=...");
        }
    }

    match open_store(&config).and_then(|store| store.stats()) {
        Ok(stats) => {
            println!("[OK] 데이터베이스: {}", stats.db_path.display());
            println!("     키워드: {} 건", stats.keyword_count);
            println!(
                "     게시글: {} 건 (본문 {} 건)",
                stats.post_count, stats.posts_with_content
            );
            println!("     게시 완료: {} 건", stats.converted_count);
        }
        Err(e) => {
            println!("[!] 저장소 열기 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn open_store(config: &CrawlConfig) -> Result<CrawlStore> {
    CrawlStore::open(&config.db_path).context("CrawlStore 열기 실패")
}

/// Ctrl-C 시 취소되는 토큰
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n[!] 취소 중... (열린 페이지를 정리합니다)");
            token.cancel();
        }
    });
    cancel
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
