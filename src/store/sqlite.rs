//! Crawl Store - rusqlite 기반 동기 저장소
//!
//! 저장 위치: ~/.crawl-forum/crawl.db (CRAWL_DB_PATH로 변경 가능)

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, Row};
use serde::Serialize;

use super::{ConvertPost, Keyword, NewPost, Post, PostGateway};

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub keyword_count: usize,
    pub post_count: usize,
    /// 본문까지 채워진 게시글 수
    pub posts_with_content: usize,
    pub converted_count: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// CrawlStore
// ============================================================================

/// SQLite 저장소
///
/// 여러 키워드 작업이 공유하므로 커넥션을 Mutex로 감쌉니다.
#[derive(Clone)]
pub struct CrawlStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

const POST_COLUMNS: &str = "id, keyword, external_post_id, title, link, content, created_at";

impl CrawlStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS keywords (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                keyword TEXT NOT NULL,
                external_post_id TEXT NOT NULL,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                content TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_posts_keyword ON posts(keyword);

            CREATE TABLE IF NOT EXISTS convert_posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                keyword TEXT NOT NULL,
                external_post_id TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                source_post_id INTEGER NOT NULL,
                published_at TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create tables")?;

        tracing::debug!("Crawl store initialized at {:?}", self.db_path);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Keywords
    // ------------------------------------------------------------------------

    /// 키워드 추가
    pub fn add_keyword(&self, name: &str) -> Result<Keyword> {
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("Keyword name must not be empty");
        }

        let conn = self.lock()?;
        conn.execute("INSERT INTO keywords (name) VALUES (?1)", params![name])
            .context("Failed to insert keyword")?;

        let keyword = Keyword {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
        };
        tracing::info!("Keyword created: {} (id={})", keyword.name, keyword.id);
        Ok(keyword)
    }

    pub fn list_keywords(&self) -> Result<Vec<Keyword>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name FROM keywords ORDER BY id")?;

        let keywords = stmt
            .query_map([], |row| {
                Ok(Keyword {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(keywords)
    }

    /// 키워드 이름 변경, 해당 ID가 없으면 false
    pub fn rename_keyword(&self, id: i64, name: &str) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("Keyword name must not be empty");
        }

        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE keywords SET name = ?1 WHERE id = ?2",
                params![name, id],
            )
            .context("Failed to update keyword")?;

        Ok(rows > 0)
    }

    pub fn delete_keyword(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM keywords WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // ------------------------------------------------------------------------
    // Posts
    // ------------------------------------------------------------------------

    /// 키워드로 게시글 조회 (최신순)
    pub fn posts_by_keyword(&self, keyword: &str, limit: usize) -> Result<Vec<Post>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM posts WHERE keyword = ?1 ORDER BY id DESC LIMIT ?2",
            POST_COLUMNS
        ))?;

        let posts = stmt
            .query_map(params![keyword, limit as i64], post_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(posts)
    }

    pub fn list_conversions(&self) -> Result<Vec<ConvertPost>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, keyword, external_post_id, title, content, source_post_id, published_at
             FROM convert_posts ORDER BY id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(ConvertPost {
                    id: row.get(0)?,
                    keyword: row.get(1)?,
                    external_post_id: row.get(2)?,
                    title: row.get(3)?,
                    content: row.get(4)?,
                    source_post_id: row.get(5)?,
                    published_at: parse_datetime(row.get::<_, String>(6)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let count = |sql: &str| -> i64 { conn.query_row(sql, [], |row| row.get(0)).unwrap_or(0) };

        Ok(StoreStats {
            keyword_count: count("SELECT COUNT(*) FROM keywords") as usize,
            post_count: count("SELECT COUNT(*) FROM posts") as usize,
            posts_with_content: count("SELECT COUNT(*) FROM posts WHERE content IS NOT NULL")
                as usize,
            converted_count: count("SELECT COUNT(*) FROM convert_posts") as usize,
            db_path: self.db_path.clone(),
        })
    }
}

impl PostGateway for CrawlStore {
    fn create_post(&self, post: NewPost) -> Result<i64> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO posts (keyword, external_post_id, title, link, content, created_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
            params![post.keyword, post.external_post_id, post.title, post.link, now],
        )
        .context("Failed to insert post")?;

        let id = conn.last_insert_rowid();
        tracing::debug!("Stored post metadata: {} (id={})", post.link, id);
        Ok(id)
    }

    fn find_post(&self, id: i64) -> Result<Option<Post>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM posts WHERE id = ?1", POST_COLUMNS))?;

        match stmt.query_row(params![id], post_from_row) {
            Ok(post) => Ok(Some(post)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("Failed to load post"),
        }
    }

    fn list_posts(&self) -> Result<Vec<Post>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM posts ORDER BY id", POST_COLUMNS))?;

        let posts = stmt
            .query_map([], post_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(posts)
    }

    fn update_post(&self, post: &Post) -> Result<()> {
        let conn = self.lock()?;

        let rows = conn
            .execute(
                "UPDATE posts SET keyword = ?1, external_post_id = ?2, title = ?3, link = ?4,
                 content = ?5 WHERE id = ?6",
                params![
                    post.keyword,
                    post.external_post_id,
                    post.title,
                    post.link,
                    post.content,
                    post.id
                ],
            )
            .context("Failed to update post")?;

        if rows == 0 {
            anyhow::bail!("Post #{} does not exist", post.id);
        }
        Ok(())
    }

    fn delete_posts(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.lock()?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let rows = conn
            .execute(
                &format!("DELETE FROM posts WHERE id IN ({})", placeholders),
                params_from_iter(ids.iter()),
            )
            .context("Failed to delete posts")?;

        tracing::info!("Deleted {} posts", rows);
        Ok(rows)
    }

    fn record_conversion(&self, post: &Post, published_title: &str) -> Result<i64> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO convert_posts
             (keyword, external_post_id, title, content, source_post_id, published_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                post.keyword,
                post.external_post_id,
                published_title,
                post.content.as_deref().unwrap_or(""),
                post.id,
                now
            ],
        )
        .context("Failed to insert converted post")?;

        Ok(conn.last_insert_rowid())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        keyword: row.get(1)?,
        external_post_id: row.get(2)?,
        title: row.get(3)?,
        link: row.get(4)?,
        content: row.get(5)?,
        created_at: parse_datetime(row.get::<_, String>(6)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
