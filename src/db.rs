use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

use crate::models::JobStatus;

/// Run and posting history kept next to the committed job list.
pub struct History {
    conn: Connection,
}

/// One completed scrape as written to `runs`.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub ran_at: DateTime<Utc>,
    pub total_candidates: usize,
    pub by_strategy: BTreeMap<String, usize>,
    pub open: usize,
    pub closed: usize,
    pub unknown: usize,
    pub added: usize,
    pub updated: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct RunRow {
    pub id: i64,
    pub ran_at: String,
    pub total_candidates: i64,
    pub open: i64,
    pub closed: i64,
    pub unknown: i64,
    pub added: i64,
    pub updated: i64,
    pub dry_run: bool,
    pub strategies: Vec<(String, i64)>,
}

/// Latest knowledge about one portal job id.
#[derive(Debug, Clone)]
pub struct PostingUpdate {
    pub job_id: String,
    /// Slug of the record built for it, when it was open
    pub slug: Option<String>,
    pub status: JobStatus,
    pub apply_url: String,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub job_id: String,
    pub slug: Option<String>,
    pub status: JobStatus,
    pub apply_url: String,
    pub verified_at: String,
}

impl History {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open history database {}", path.display()))?;
        let history = Self { conn };
        history.init()?;
        Ok(history)
    }

    fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ran_at TEXT NOT NULL,
                total_candidates INTEGER NOT NULL,
                open_count INTEGER NOT NULL,
                closed_count INTEGER NOT NULL,
                unknown_count INTEGER NOT NULL,
                added INTEGER NOT NULL DEFAULT 0,
                updated INTEGER NOT NULL DEFAULT 0,
                dry_run INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS run_strategies (
                run_id INTEGER NOT NULL REFERENCES runs(id),
                strategy TEXT NOT NULL,
                candidates INTEGER NOT NULL,
                PRIMARY KEY (run_id, strategy)
            );

            CREATE TABLE IF NOT EXISTS postings (
                job_id TEXT PRIMARY KEY,
                slug TEXT,
                status TEXT NOT NULL CHECK (status IN ('OPEN', 'CLOSED', 'UNKNOWN')),
                apply_url TEXT NOT NULL,
                verified_at TEXT NOT NULL,
                first_seen TEXT NOT NULL DEFAULT (datetime('now')),
                last_seen TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_postings_slug ON postings(slug);
            CREATE INDEX IF NOT EXISTS idx_postings_status ON postings(status);
            "#,
        )?;
        Ok(())
    }

    // --- Run operations ---

    pub fn record_run(&mut self, run: &RunSummary) -> Result<i64> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO runs (ran_at, total_candidates, open_count, closed_count, unknown_count, added, updated, dry_run)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.ran_at.to_rfc3339(),
                run.total_candidates as i64,
                run.open as i64,
                run.closed as i64,
                run.unknown as i64,
                run.added as i64,
                run.updated as i64,
                run.dry_run,
            ],
        )?;
        let run_id = tx.last_insert_rowid();

        for (strategy, count) in &run.by_strategy {
            tx.execute(
                "INSERT INTO run_strategies (run_id, strategy, candidates) VALUES (?1, ?2, ?3)",
                params![run_id, strategy, *count as i64],
            )?;
        }
        tx.commit().context("Failed to record run")?;
        Ok(run_id)
    }

    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ran_at, total_candidates, open_count, closed_count, unknown_count, added, updated, dry_run
             FROM runs ORDER BY id DESC LIMIT ?1",
        )?;
        let mut runs = stmt
            .query_map([limit as i64], Self::row_to_run)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list runs")?;

        let mut strategies = self.conn.prepare(
            "SELECT strategy, candidates FROM run_strategies WHERE run_id = ?1 ORDER BY strategy",
        )?;
        for run in &mut runs {
            run.strategies = strategies
                .query_map([run.id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
        }
        Ok(runs)
    }

    fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<RunRow> {
        Ok(RunRow {
            id: row.get(0)?,
            ran_at: row.get(1)?,
            total_candidates: row.get(2)?,
            open: row.get(3)?,
            closed: row.get(4)?,
            unknown: row.get(5)?,
            added: row.get(6)?,
            updated: row.get(7)?,
            dry_run: row.get(8)?,
            strategies: Vec::new(),
        })
    }

    // --- Posting operations ---

    /// Upsert what this run learned. An UNKNOWN probe never overwrites an
    /// earlier OPEN/CLOSED verdict, and a missing slug keeps the stored one.
    pub fn record_postings(&mut self, updates: &[PostingUpdate]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for update in updates {
            tx.execute(
                "INSERT INTO postings (job_id, slug, status, apply_url, verified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(job_id) DO UPDATE SET
                    slug = COALESCE(excluded.slug, postings.slug),
                    status = CASE WHEN excluded.status = 'UNKNOWN' THEN postings.status ELSE excluded.status END,
                    verified_at = CASE WHEN excluded.status = 'UNKNOWN' THEN postings.verified_at ELSE excluded.verified_at END,
                    apply_url = excluded.apply_url,
                    last_seen = datetime('now')",
                params![
                    update.job_id,
                    update.slug,
                    update.status.as_str(),
                    update.apply_url,
                    update.verified_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit().context("Failed to record postings")?;
        Ok(())
    }

    /// Slug last committed for a portal job id, if any.
    pub fn slug_for(&self, job_id: &str) -> Result<Option<String>> {
        let slug: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT slug FROM postings WHERE job_id = ?1",
                [job_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(slug.flatten())
    }

    pub fn get_posting(&self, job_id: &str) -> Result<Option<Posting>> {
        self.conn
            .query_row(
                "SELECT job_id, slug, status, apply_url, verified_at FROM postings WHERE job_id = ?1",
                [job_id],
                Self::row_to_posting,
            )
            .optional()
            .context("Failed to read posting")
    }

    /// Postings last confirmed CLOSED that still have a committed slug, minus
    /// slugs another job id currently holds OPEN (a reposted role).
    pub fn closed_postings(&self) -> Result<Vec<Posting>> {
        let mut stmt = self.conn.prepare(
            "SELECT job_id, slug, status, apply_url, verified_at FROM postings
             WHERE status = 'CLOSED' AND slug IS NOT NULL
               AND slug NOT IN (SELECT slug FROM postings WHERE status = 'OPEN' AND slug IS NOT NULL)
             ORDER BY job_id",
        )?;
        stmt.query_map([], Self::row_to_posting)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list closed postings")
    }

    fn row_to_posting(row: &rusqlite::Row) -> rusqlite::Result<Posting> {
        let status: String = row.get(2)?;
        Ok(Posting {
            job_id: row.get(0)?,
            slug: row.get(1)?,
            status: JobStatus::parse(&status).unwrap_or(JobStatus::Unknown),
            apply_url: row.get(3)?,
            verified_at: row.get(4)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> (tempfile::TempDir, History) {
        let dir = tempfile::tempdir().unwrap();
        let history = History::open(&dir.path().join("nested/history.db")).unwrap();
        (dir, history)
    }

    fn update(job_id: &str, slug: Option<&str>, status: JobStatus) -> PostingUpdate {
        PostingUpdate {
            job_id: job_id.to_string(),
            slug: slug.map(str::to_string),
            status,
            apply_url: format!("https://portal&selectedMenuKey=CareerCenter&jobId={}", job_id),
            verified_at: Utc::now(),
        }
    }

    #[test]
    fn test_record_and_list_runs() {
        let (_dir, mut history) = history();
        let run = RunSummary {
            ran_at: Utc::now(),
            total_candidates: 5,
            by_strategy: BTreeMap::from([
                ("attribute_pattern".to_string(), 3),
                ("inline_script".to_string(), 2),
            ]),
            open: 2,
            closed: 1,
            unknown: 0,
            added: 2,
            updated: 0,
            dry_run: false,
        };
        let first = history.record_run(&run).unwrap();
        let second = history.record_run(&RunSummary { dry_run: true, ..run }).unwrap();
        assert!(second > first);

        let runs = history.list_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second);
        assert!(runs[0].dry_run);
        assert_eq!(runs[1].open, 2);
        assert_eq!(
            runs[1].strategies,
            vec![("attribute_pattern".to_string(), 3), ("inline_script".to_string(), 2)]
        );

        assert_eq!(history.list_runs(1).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_does_not_mask_verdict() {
        let (_dir, mut history) = history();
        history
            .record_postings(&[update("564827", Some("finance-manager"), JobStatus::Open)])
            .unwrap();
        history
            .record_postings(&[update("564827", None, JobStatus::Unknown)])
            .unwrap();

        let posting = history.get_posting("564827").unwrap().unwrap();
        assert_eq!(posting.status, JobStatus::Open);
        assert_eq!(posting.slug.as_deref(), Some("finance-manager"));
        assert_eq!(history.slug_for("564827").unwrap().as_deref(), Some("finance-manager"));
        assert_eq!(history.slug_for("999").unwrap(), None);
    }

    #[test]
    fn test_closed_postings_keep_their_slug() {
        let (_dir, mut history) = history();
        history
            .record_postings(&[
                update("1", Some("finance-manager"), JobStatus::Open),
                update("2", Some("ecommerce-manager"), JobStatus::Open),
                update("3", None, JobStatus::Closed),
            ])
            .unwrap();
        history
            .record_postings(&[update("2", None, JobStatus::Closed)])
            .unwrap();

        let closed = history.closed_postings().unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].job_id, "2");
        assert_eq!(closed[0].slug.as_deref(), Some("ecommerce-manager"));
    }

    #[test]
    fn test_reposted_slug_is_not_closed() {
        let (_dir, mut history) = history();
        history
            .record_postings(&[
                update("100", Some("finance-manager"), JobStatus::Open),
                update("200", Some("finance-manager"), JobStatus::Open),
            ])
            .unwrap();
        history
            .record_postings(&[update("100", None, JobStatus::Closed)])
            .unwrap();
        assert!(history.closed_postings().unwrap().is_empty());

        history
            .record_postings(&[update("200", None, JobStatus::Closed)])
            .unwrap();
        let closed: Vec<_> = history
            .closed_postings()
            .unwrap()
            .into_iter()
            .map(|p| p.job_id)
            .collect();
        assert_eq!(closed, vec!["100".to_string(), "200".to_string()]);
    }
}
