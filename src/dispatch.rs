// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Background batch dispatch
//!
//! Attachments are scanned page by page and each page is queued as one
//! `process_ai_batch` job. A worker later claims due jobs, categorizes every
//! id in the batch and marks it processed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::categorize::Categorizer;
use crate::db::Database;
use crate::{RenamerError, Result};

pub const BATCH_HOOK: &str = "process_ai_batch";
pub const JOB_GROUP: &str = "media-ai";

/// Payload of a batch job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchArgs {
    pub ids: Vec<i64>,
}

/// Summary of one worker pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub jobs_run: usize,
    pub jobs_failed: usize,
    pub attachments_processed: usize,
}

pub struct Dispatcher<'a> {
    db: &'a Database,
    batch_size: usize,
    delay: Duration,
}

impl<'a> Dispatcher<'a> {
    pub fn new(db: &'a Database, batch_size: usize, delay_secs: i64) -> Self {
        Self {
            db,
            batch_size: batch_size.max(1),
            delay: Duration::seconds(delay_secs.max(0)),
        }
    }

    /// Queue every attachment (or only unprocessed ones) in batches.
    ///
    /// Returns the number of batches handed to [`Self::dispatch_batch`].
    pub fn scan_attachments(&self, full: bool) -> Result<usize> {
        let mut page = 1;
        let mut batches = 0;

        loop {
            let ids = self.db.attachment_ids_page(page, self.batch_size, !full)?;
            if ids.is_empty() {
                break;
            }

            self.dispatch_batch(&ids)?;
            batches += 1;

            if ids.len() < self.batch_size {
                break;
            }
            page += 1;
        }

        info!("Scan dispatched {} batches (full: {})", batches, full);
        Ok(batches)
    }

    /// Schedule one batch job, unless an identical one is still pending.
    ///
    /// Returns the new job id, or `None` for a duplicate.
    pub fn dispatch_batch(&self, ids: &[i64]) -> Result<Option<i64>> {
        self.dispatch_batch_at(ids, Utc::now())
    }

    fn dispatch_batch_at(&self, ids: &[i64], now: DateTime<Utc>) -> Result<Option<i64>> {
        let args = serde_json::to_value(BatchArgs { ids: ids.to_vec() })?;

        if self.db.has_pending_job(BATCH_HOOK, &args, JOB_GROUP)? {
            debug!("Batch {:?} already scheduled", ids);
            return Ok(None);
        }

        let job = self.db.schedule_job(now + self.delay, BATCH_HOOK, &args, JOB_GROUP)?;
        debug!("Scheduled job {} for {} attachments", job, ids.len());
        Ok(Some(job))
    }

    /// Claim and run every job due at `now`
    pub async fn run_due_jobs(&self, categorizer: &Categorizer<'_>, now: DateTime<Utc>) -> Result<WorkerReport> {
        let mut report = WorkerReport::default();

        for job in self.db.claim_due_jobs(now, usize::MAX)? {
            report.jobs_run += 1;

            let outcome = if job.hook == BATCH_HOOK {
                match serde_json::from_value::<BatchArgs>(job.args.clone()) {
                    Ok(args) => self.process_ai_batch(categorizer, &args).await,
                    Err(e) => Err(RenamerError::Json(e)),
                }
            } else {
                Err(RenamerError::Config(format!("Unknown job hook: {}", job.hook)))
            };

            match outcome {
                Ok(count) => {
                    report.attachments_processed += count;
                    self.db.complete_job(job.id)?;
                }
                Err(e) => {
                    warn!("Job {} failed: {}", job.id, e);
                    report.jobs_failed += 1;
                    self.db.fail_job(job.id, &e.to_string())?;
                }
            }
        }

        if report.jobs_run > 0 {
            info!(
                "Worker ran {} jobs ({} failed), processed {} attachments",
                report.jobs_run, report.jobs_failed, report.attachments_processed
            );
        }
        Ok(report)
    }

    /// Categorize each id and mark it processed.
    ///
    /// Per-attachment AI failures are logged; the attachment is still marked.
    pub async fn process_ai_batch(&self, categorizer: &Categorizer<'_>, args: &BatchArgs) -> Result<usize> {
        let ids: Vec<i64> = args.ids.iter().copied().filter(|id| *id > 0).collect();

        for &id in &ids {
            if let Err(e) = categorizer.process_attachment(id).await {
                warn!("AI categorization failed for attachment {}: {}", id, e);
            }
        }
        for &id in &ids {
            self.db.mark_processed(id)?;
        }

        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{Categorization, CategorizeRequest, FilenameAi};
    use crate::categorize::CATEGORY_TAXONOMY;
    use crate::db::NewAttachment;
    use crate::library::{LibraryPaths, RecordStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAi {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FilenameAi for CountingAi {
        async fn suggest_filename(&self, _prompt: &str) -> Result<String> {
            Ok(String::new())
        }

        async fn categorize(&self, _request: &CategorizeRequest) -> Result<Categorization> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Categorization { categories: vec!["Landscape".into()], title: None })
        }
    }

    fn seed(db: &Database, n: usize) -> Vec<i64> {
        (0..n)
            .map(|i| {
                let id = db
                    .insert_attachment(&NewAttachment {
                        title: format!("img{}", i),
                        attached_file: format!("img{}.jpg", i),
                        ..Default::default()
                    })
                    .unwrap();
                db.update_attachment_metadata(id, &serde_json::json!({"width": 10, "height": 10}))
                    .unwrap();
                id
            })
            .collect()
    }

    fn batch_ids(db: &Database) -> Vec<Vec<i64>> {
        db.jobs()
            .unwrap()
            .into_iter()
            .map(|j| serde_json::from_value::<BatchArgs>(j.args).unwrap().ids)
            .collect()
    }

    #[test]
    fn test_scan_pages_through_attachments() {
        let db = Database::in_memory().unwrap();
        let ids = seed(&db, 5);

        let batches = Dispatcher::new(&db, 2, 5).scan_attachments(false).unwrap();

        assert_eq!(batches, 3);
        assert_eq!(
            batch_ids(&db),
            vec![vec![ids[0], ids[1]], vec![ids[2], ids[3]], vec![ids[4]]]
        );
    }

    #[test]
    fn test_scan_stops_on_exact_multiple() {
        let db = Database::in_memory().unwrap();
        seed(&db, 4);
        assert_eq!(Dispatcher::new(&db, 2, 5).scan_attachments(true).unwrap(), 2);
    }

    #[test]
    fn test_scan_skips_processed_unless_full() {
        let db = Database::in_memory().unwrap();
        let ids = seed(&db, 3);
        db.mark_processed(ids[0]).unwrap();

        let dispatcher = Dispatcher::new(&db, 10, 5);
        dispatcher.scan_attachments(false).unwrap();
        assert_eq!(batch_ids(&db), vec![vec![ids[1], ids[2]]]);

        dispatcher.scan_attachments(true).unwrap();
        assert_eq!(batch_ids(&db).len(), 2);
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let db = Database::in_memory().unwrap();
        seed(&db, 2);
        assert_eq!(Dispatcher::new(&db, 0, 5).scan_attachments(true).unwrap(), 2);
    }

    #[test]
    fn test_duplicate_batches_are_not_rescheduled() {
        let db = Database::in_memory().unwrap();
        let dispatcher = Dispatcher::new(&db, 10, 5);

        assert!(dispatcher.dispatch_batch(&[1, 2]).unwrap().is_some());
        assert!(dispatcher.dispatch_batch(&[1, 2]).unwrap().is_none());
        assert!(dispatcher.dispatch_batch(&[2, 1]).unwrap().is_some());
        assert_eq!(db.jobs().unwrap().len(), 2);
    }

    #[test]
    fn test_jobs_are_delayed() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();
        Dispatcher::new(&db, 10, 5).dispatch_batch_at(&[1], now).unwrap();

        let job = &db.jobs().unwrap()[0];
        assert_eq!(job.group, JOB_GROUP);
        assert_eq!(job.hook, BATCH_HOOK);
        assert_eq!(job.scheduled_at.timestamp(), (now + Duration::seconds(5)).timestamp());
    }

    #[tokio::test]
    async fn test_worker_runs_due_jobs() {
        let db = Database::in_memory().unwrap();
        let ids = seed(&db, 3);
        let ai = CountingAi { calls: AtomicUsize::new(0) };
        let dir = tempfile::tempdir().unwrap();
        let categorizer = Categorizer::new(&ai, &db, LibraryPaths::new(dir.path().to_path_buf(), "http://x"));
        let dispatcher = Dispatcher::new(&db, 10, 5);
        dispatcher.scan_attachments(false).unwrap();

        // Not yet due
        let report = dispatcher.run_due_jobs(&categorizer, Utc::now()).await.unwrap();
        assert_eq!(report.jobs_run, 0);

        let later = Utc::now() + Duration::seconds(10);
        let report = dispatcher.run_due_jobs(&categorizer, later).await.unwrap();
        assert_eq!(report.jobs_run, 1);
        assert_eq!(report.attachments_processed, 3);
        assert_eq!(ai.calls.load(Ordering::SeqCst), 3);
        assert_eq!(db.jobs().unwrap()[0].status, "done");
        assert_eq!(db.terms(ids[0], CATEGORY_TAXONOMY).unwrap(), vec!["Landscape"]);

        // Everything is processed now, so an incremental scan finds nothing
        assert_eq!(dispatcher.scan_attachments(false).unwrap(), 0);
        assert!(db.attachment(ids[2]).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bad_job_args_fail_the_job() {
        let db = Database::in_memory().unwrap();
        db.schedule_job(Utc::now(), BATCH_HOOK, &serde_json::json!({"nope": true}), JOB_GROUP)
            .unwrap();
        let ai = CountingAi { calls: AtomicUsize::new(0) };
        let dir = tempfile::tempdir().unwrap();
        let categorizer = Categorizer::new(&ai, &db, LibraryPaths::new(dir.path().to_path_buf(), "http://x"));

        let report = Dispatcher::new(&db, 10, 5)
            .run_due_jobs(&categorizer, Utc::now() + Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(report.jobs_failed, 1);
        let job = &db.jobs().unwrap()[0];
        assert_eq!(job.status, "failed");
        assert!(job.last_error.is_some());
    }
}
