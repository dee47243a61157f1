// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Database module for the media library: posts, metadata, terms and jobs

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Error::FromSqlConversionFailure;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::library::{Attachment, RecordStore, ReferenceTable};
use crate::sanitize::sanitize_title;
use crate::{RenamerError, Result};

pub const META_ATTACHED_FILE: &str = "_attached_file";
pub const META_ATTACHMENT_METADATA: &str = "_attachment_metadata";
pub const META_AI_PROCESSED: &str = "_ai_processed";

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Database manager for the media library (thread-safe wrapper)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Fields needed to register a new attachment
#[derive(Debug, Clone, Default)]
pub struct NewAttachment {
    pub title: String,
    pub parent: i64,
    pub caption: String,
    /// Stored relative to the library base directory
    pub attached_file: String,
    /// Defaults to now
    pub date: Option<NaiveDateTime>,
}

/// One page of attachments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentPage {
    pub attachments: Vec<Attachment>,
    pub current_page: usize,
    pub per_page: usize,
    pub total_posts: i64,
    pub total_pages: i64,
}

/// A queued background job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub hook: String,
    pub args: serde_json::Value,
    pub group: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: String,
    pub attempts: i64,
    pub last_error: Option<String>,
}

/// Database statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStats {
    pub attachment_count: i64,
    pub processed_count: i64,
    pub pending_jobs: i64,
    pub failed_jobs: i64,
}

const ATTACHMENT_COLUMNS: &str = r#"p.id, p.post_title, p.post_name, p.post_status, p.post_type,
    p.post_parent, p.post_date, p.post_excerpt,
    (SELECT meta_value FROM postmeta m WHERE m.post_id = p.id AND m.meta_key = '_attached_file'
     ORDER BY m.meta_id DESC LIMIT 1)"#;

fn attachment_from_row(row: &Row<'_>) -> rusqlite::Result<Attachment> {
    Ok(Attachment {
        id: row.get(0)?,
        title: row.get(1)?,
        slug: row.get(2)?,
        status: row.get(3)?,
        post_type: row.get(4)?,
        parent: row.get(5)?,
        date: row.get(6)?,
        caption: row.get(7)?,
        attached_file: row.get(8)?,
    })
}

/// Unparseable `args` or `scheduled_at` text is a conversion error
fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let args: String = row.get(2)?;
    let scheduled: String = row.get(4)?;
    Ok(Job {
        id: row.get(0)?,
        hook: row.get(1)?,
        args: serde_json::from_str(&args)
            .map_err(|e| FromSqlConversionFailure(2, Type::Text, Box::new(e)))?,
        group: row.get(3)?,
        scheduled_at: DateTime::parse_from_rfc3339(&scheduled)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        status: row.get(5)?,
        attempts: row.get(6)?,
        last_error: row.get(7)?,
    })
}

/// Escape `%`, `_` and `\` for use inside a `LIKE ... ESCAPE '\'` pattern
pub fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn get_meta(conn: &Connection, post_id: i64, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT meta_value FROM postmeta WHERE post_id = ?1 AND meta_key = ?2 ORDER BY meta_id DESC LIMIT 1",
        params![post_id, key],
        |row| row.get(0),
    )
    .optional()
}

fn set_meta(conn: &Connection, post_id: i64, key: &str, value: &str) -> rusqlite::Result<()> {
    let updated = conn.execute(
        "UPDATE postmeta SET meta_value = ?3 WHERE post_id = ?1 AND meta_key = ?2",
        params![post_id, key, value],
    )?;
    if updated == 0 {
        conn.execute(
            "INSERT INTO postmeta (post_id, meta_key, meta_value) VALUES (?1, ?2, ?3)",
            params![post_id, key, value],
        )?;
    }
    Ok(())
}

fn slug_taken(conn: &Connection, slug: &str, id: i64, post_type: &str, parent: i64) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM posts WHERE post_name = ?1 AND post_type = ?2 AND post_parent = ?3 AND id != ?4 LIMIT 1",
        params![slug, post_type, parent, id],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

fn unique_slug_with(
    conn: &Connection,
    slug: &str,
    id: i64,
    status: &str,
    post_type: &str,
    parent: i64,
) -> rusqlite::Result<String> {
    // Unpublished drafts keep whatever slug they are given
    if matches!(status, "draft" | "pending" | "auto-draft") {
        return Ok(slug.to_string());
    }

    let base = if slug.is_empty() { id.to_string() } else { slug.to_string() };
    if !slug_taken(conn, &base, id, post_type, parent)? {
        return Ok(base);
    }

    let mut suffix = 2;
    loop {
        let candidate = format!("{}-{}", base, suffix);
        if !slug_taken(conn, &candidate, id, post_type, parent)? {
            return Ok(candidate);
        }
        suffix += 1;
    }
}

impl Database {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RenamerError::Config("Database lock poisoned".to_string()))
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                post_title TEXT NOT NULL DEFAULT '',
                post_name TEXT NOT NULL DEFAULT '',
                post_status TEXT NOT NULL DEFAULT 'publish',
                post_type TEXT NOT NULL DEFAULT 'post',
                post_parent INTEGER NOT NULL DEFAULT 0,
                post_content TEXT NOT NULL DEFAULT '',
                post_excerpt TEXT NOT NULL DEFAULT '',
                post_date TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS postmeta (
                meta_id INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id INTEGER NOT NULL,
                meta_key TEXT NOT NULL,
                meta_value TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS terms (
                post_id INTEGER NOT NULL,
                taxonomy TEXT NOT NULL,
                name TEXT NOT NULL,
                PRIMARY KEY (post_id, taxonomy, name)
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hook TEXT NOT NULL,
                args TEXT NOT NULL,
                job_group TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_posts_type_status ON posts(post_type, post_status);
            CREATE INDEX IF NOT EXISTS idx_posts_name ON posts(post_name);
            CREATE INDEX IF NOT EXISTS idx_postmeta_post_key ON postmeta(post_id, meta_key);
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, scheduled_at);
        "#)?;
        Ok(())
    }

    // === Posts and attachments ===

    /// Register a new attachment record and return its id
    pub fn insert_attachment(&self, new: &NewAttachment) -> Result<i64> {
        let conn = self.lock_conn()?;
        let date = new.date.unwrap_or_else(|| Utc::now().naive_utc()).format(DATE_FORMAT).to_string();

        conn.execute(
            r#"INSERT INTO posts (post_title, post_status, post_type, post_parent, post_excerpt, post_date)
               VALUES (?1, 'inherit', 'attachment', ?2, ?3, ?4)"#,
            params![new.title, new.parent, new.caption, date],
        )?;
        let id = conn.last_insert_rowid();

        let slug = unique_slug_with(&conn, &sanitize_title(&new.title), id, "inherit", "attachment", new.parent)?;
        conn.execute("UPDATE posts SET post_name = ?2 WHERE id = ?1", params![id, slug])?;
        set_meta(&conn, id, META_ATTACHED_FILE, &new.attached_file)?;

        debug!("Inserted attachment {} ({})", id, new.attached_file);
        Ok(id)
    }

    /// Insert a content post (page, article) and return its id
    pub fn insert_post(&self, post_type: &str, title: &str, content: &str) -> Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO posts (post_title, post_name, post_type, post_content) VALUES (?1, ?2, ?3, ?4)",
            params![title, sanitize_title(title), post_type, content],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn post_content(&self, id: i64) -> Result<Option<String>> {
        let conn = self.lock_conn()?;
        conn.query_row("SELECT post_content FROM posts WHERE id = ?1", params![id], |row| row.get(0))
            .optional()
            .map_err(Into::into)
    }

    pub fn get_meta(&self, post_id: i64, key: &str) -> Result<Option<String>> {
        let conn = self.lock_conn()?;
        Ok(get_meta(&conn, post_id, key)?)
    }

    pub fn set_meta(&self, post_id: i64, key: &str, value: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        Ok(set_meta(&conn, post_id, key, value)?)
    }

    /// Attachment whose stored path equals `relative`
    pub fn find_by_attached_file(&self, relative: &str) -> Result<Option<i64>> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT post_id FROM postmeta WHERE meta_key = ?1 AND meta_value = ?2 LIMIT 1",
            params![META_ATTACHED_FILE, relative],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn update_title(&self, id: i64, title: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("UPDATE posts SET post_title = ?2 WHERE id = ?1", params![id, title])?;
        Ok(())
    }

    /// Attachments newest first
    pub fn list_attachments(&self, page: usize, per_page: usize) -> Result<AttachmentPage> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let conn = self.lock_conn()?;

        let total_posts: i64 = conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE post_type = 'attachment' AND post_status = 'inherit'",
            [],
            |row| row.get(0),
        )?;

        let sql = format!(
            r#"SELECT {} FROM posts p
               WHERE p.post_type = 'attachment' AND p.post_status = 'inherit'
               ORDER BY p.post_date DESC, p.id DESC LIMIT ?1 OFFSET ?2"#,
            ATTACHMENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let attachments = stmt
            .query_map(params![per_page as i64, ((page - 1) * per_page) as i64], attachment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let per = per_page as i64;
        Ok(AttachmentPage {
            attachments,
            current_page: page,
            per_page,
            total_posts,
            total_pages: (total_posts + per - 1) / per,
        })
    }

    /// Attachment ids in id order, optionally only those not yet AI-processed
    pub fn attachment_ids_page(&self, page: usize, per_page: usize, only_unprocessed: bool) -> Result<Vec<i64>> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let conn = self.lock_conn()?;

        let filter = if only_unprocessed {
            "AND NOT EXISTS (SELECT 1 FROM postmeta m WHERE m.post_id = p.id AND m.meta_key = '_ai_processed')"
        } else {
            ""
        };
        let sql = format!(
            r#"SELECT p.id FROM posts p
               WHERE p.post_type = 'attachment' AND p.post_status = 'inherit' {}
               ORDER BY p.id ASC LIMIT ?1 OFFSET ?2"#,
            filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params![per_page as i64, ((page - 1) * per_page) as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    pub fn mark_processed(&self, id: i64) -> Result<()> {
        self.set_meta(id, META_AI_PROCESSED, "1")
    }

    /// Replace the terms of `taxonomy` attached to a post
    pub fn set_terms(&self, post_id: i64, taxonomy: &str, names: &[String]) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM terms WHERE post_id = ?1 AND taxonomy = ?2", params![post_id, taxonomy])?;
        for name in names {
            tx.execute(
                "INSERT OR IGNORE INTO terms (post_id, taxonomy, name) VALUES (?1, ?2, ?3)",
                params![post_id, taxonomy, name],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn terms(&self, post_id: i64, taxonomy: &str) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT name FROM terms WHERE post_id = ?1 AND taxonomy = ?2 ORDER BY name")?;
        let names = stmt
            .query_map(params![post_id, taxonomy], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    // === Jobs ===

    /// Whether an identical job is still waiting to run
    pub fn has_pending_job(&self, hook: &str, args: &serde_json::Value, group: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let args = serde_json::to_string(args)?;
        let found = conn
            .query_row(
                r#"SELECT 1 FROM jobs WHERE hook = ?1 AND args = ?2 AND job_group = ?3
                   AND status IN ('pending', 'running') LIMIT 1"#,
                params![hook, args, group],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn schedule_job(&self, at: DateTime<Utc>, hook: &str, args: &serde_json::Value, group: &str) -> Result<i64> {
        let conn = self.lock_conn()?;
        let args = serde_json::to_string(args)?;
        conn.execute(
            "INSERT INTO jobs (hook, args, job_group, scheduled_at) VALUES (?1, ?2, ?3, ?4)",
            params![hook, args, group, at.to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Mark due pending jobs as running and return them in schedule order.
    ///
    /// Rows that cannot be decoded are marked failed so they never block the queue.
    pub fn claim_due_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let (jobs, corrupt) = {
            let mut stmt = tx.prepare(
                r#"SELECT id, hook, args, job_group, scheduled_at, status, attempts, last_error
                   FROM jobs WHERE status = 'pending' ORDER BY scheduled_at ASC, id ASC"#,
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, job_from_row(row))))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut jobs = Vec::new();
            let mut corrupt = Vec::new();
            for (id, decoded) in rows {
                match decoded {
                    Ok(job) => jobs.push(job),
                    Err(e) => corrupt.push((id, e.to_string())),
                }
            }
            let due = jobs.into_iter().filter(|j| j.scheduled_at <= now).take(limit).collect::<Vec<_>>();
            (due, corrupt)
        };
        for (id, error) in &corrupt {
            warn!("Job {} is corrupt, marking it failed: {}", id, error);
            tx.execute(
                "UPDATE jobs SET status = 'failed', last_error = ?2 WHERE id = ?1",
                params![id, format!("Corrupt job row: {}", error)],
            )?;
        }
        for job in &jobs {
            tx.execute(
                "UPDATE jobs SET status = 'running', attempts = attempts + 1 WHERE id = ?1",
                params![job.id],
            )?;
        }
        tx.commit()?;

        Ok(jobs
            .into_iter()
            .map(|mut j| {
                j.status = "running".to_string();
                j.attempts += 1;
                j
            })
            .collect())
    }

    pub fn complete_job(&self, id: i64) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("UPDATE jobs SET status = 'done', last_error = NULL WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn fail_job(&self, id: i64, error: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("UPDATE jobs SET status = 'failed', last_error = ?2 WHERE id = ?1", params![id, error])?;
        Ok(())
    }

    pub fn jobs(&self) -> Result<Vec<Job>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, hook, args, job_group, scheduled_at, status, attempts, last_error FROM jobs ORDER BY id",
        )?;
        let jobs = stmt.query_map([], job_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    // === Maintenance ===

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DbStats> {
        let conn = self.lock_conn()?;
        let attachment_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE post_type = 'attachment'",
            [],
            |row| row.get(0),
        )?;
        let processed_count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT post_id) FROM postmeta WHERE meta_key = ?1",
            params![META_AI_PROCESSED],
            |row| row.get(0),
        )?;
        let pending_jobs: i64 =
            conn.query_row("SELECT COUNT(*) FROM jobs WHERE status = 'pending'", [], |row| row.get(0))?;
        let failed_jobs: i64 =
            conn.query_row("SELECT COUNT(*) FROM jobs WHERE status = 'failed'", [], |row| row.get(0))?;
        Ok(DbStats { attachment_count, processed_count, pending_jobs, failed_jobs })
    }

    /// Vacuum database
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("VACUUM", [])?;
        Ok(())
    }
}

impl RecordStore for Database {
    fn attachment(&self, id: i64) -> Result<Option<Attachment>> {
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {} FROM posts p WHERE p.id = ?1", ATTACHMENT_COLUMNS);
        conn.query_row(&sql, params![id], attachment_from_row)
            .optional()
            .map_err(Into::into)
    }

    fn attached_file(&self, id: i64) -> Result<Option<String>> {
        Ok(self.get_meta(id, META_ATTACHED_FILE)?.filter(|p| !p.is_empty()))
    }

    fn update_attached_file(&self, id: i64, relative: &str) -> Result<()> {
        self.set_meta(id, META_ATTACHED_FILE, relative)
    }

    fn unique_slug(&self, slug: &str, id: i64, status: &str, post_type: &str, parent: i64) -> Result<String> {
        let conn = self.lock_conn()?;
        Ok(unique_slug_with(&conn, slug, id, status, post_type, parent)?)
    }

    fn update_title_and_slug(&self, id: i64, title: &str, slug: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE posts SET post_title = ?2, post_name = ?3 WHERE id = ?1",
            params![id, title, slug],
        )?;
        Ok(())
    }

    fn attachment_metadata(&self, id: i64) -> Result<Option<serde_json::Value>> {
        match self.get_meta(id, META_ATTACHMENT_METADATA)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn update_attachment_metadata(&self, id: i64, metadata: &serde_json::Value) -> Result<()> {
        let json = serde_json::to_string(metadata)?;
        self.set_meta(id, META_ATTACHMENT_METADATA, &json)
    }

    fn replace_references(&self, table: ReferenceTable, old: &str, new: &str) -> Result<usize> {
        if old.is_empty() {
            return Ok(0);
        }
        let conn = self.lock_conn()?;
        let like = format!("%{}%", escape_like(old));

        // LIKE narrows the scan; instr keeps the match case-sensitive like REPLACE
        let sql = match table {
            ReferenceTable::Content => {
                r#"UPDATE posts SET post_content = REPLACE(post_content, ?1, ?2)
                   WHERE post_content LIKE ?3 ESCAPE '\' AND instr(post_content, ?1) > 0"#
            }
            ReferenceTable::Meta => {
                r#"UPDATE postmeta SET meta_value = REPLACE(meta_value, ?1, ?2)
                   WHERE meta_value LIKE ?3 ESCAPE '\' AND instr(meta_value, ?1) > 0"#
            }
        };
        let changed = conn.execute(sql, params![old, new, like])?;
        debug!("Replaced {:?} references in {} rows", table, changed);
        Ok(changed)
    }
}
