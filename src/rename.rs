// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Rename applier
//!
//! Applies a list of `(id, old, new)` rename requests to the media library.
//! Each request is processed to completion before the next one starts:
//!
//! 1. sanitize both names and record the intent in the history log
//! 2. resolve the attachment's current file (missing record or file: skip)
//! 3. build `<new>.<original extension>` in the same directory
//! 4. make the name collision-free
//! 5. move the file
//! 6. store the new relative path
//! 7. set the title and a unique slug
//! 8. regenerate derived assets
//! 9. store the new asset metadata
//! 10. rewrite old URLs in post bodies and metadata values
//!
//! A failure after the move puts the file back where it was. Record updates
//! already written stay in place unless [`RollbackPolicy::Full`] is chosen.
//! One request failing never stops the batch.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::library::{AssetGenerator, FileStore, LibraryPaths, RecordStore, ReferenceTable, RenameLog};
use crate::sanitize::{sanitize_file_name, sanitize_title, split_extension, strip_extension_suffix};
use crate::{RenamerError, Result};

/// One requested rename; `old` and `new` are untrusted basenames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameRequest {
    pub id: i64,
    pub old: String,
    pub new: String,
}

/// What to undo when a request fails after its file was moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    /// Move the file back; keep record updates
    #[default]
    FileOnly,
    /// Move the file back and restore path, title, slug and asset metadata
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Record or backing file missing; nothing was touched
    NotFound,
    /// Target name empty after sanitizing; nothing was touched
    InvalidName,
    /// The file could not be moved; nothing was touched
    MoveFailed,
    /// A step after the move failed
    PostMove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RenameResult {
    Renamed {
        from: PathBuf,
        to: PathBuf,
        title: String,
        slug: String,
        references_updated: usize,
    },
    Failed {
        kind: FailureKind,
        message: String,
        /// File moved back to its original path
        rolled_back: bool,
        /// Path, title, slug and metadata restored
        records_restored: bool,
    },
}

/// Per-request result of [`RenameApplier::apply_all`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameOutcome {
    pub id: i64,
    pub old: String,
    pub new: String,
    #[serde(flatten)]
    pub result: RenameResult,
}

impl RenameOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, RenameResult::Renamed { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.result {
            RenameResult::Failed { kind, .. } => Some(*kind),
            RenameResult::Renamed { .. } => None,
        }
    }
}

struct Failure {
    kind: FailureKind,
    message: String,
}

impl Failure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    fn post_move(err: RenamerError) -> Self {
        Self::new(FailureKind::PostMove, err.to_string())
    }
}

/// Record fields captured before the first write
struct Snapshot {
    attached_file: Option<String>,
    title: String,
    slug: String,
    metadata: Option<serde_json::Value>,
}

#[derive(Default)]
struct Attempt {
    /// (original, moved_to)
    moved: Option<(PathBuf, PathBuf)>,
    snapshot: Option<Snapshot>,
    records_touched: bool,
}

/// Applies rename requests through injected collaborators
pub struct RenameApplier<'a> {
    files: &'a dyn FileStore,
    records: &'a dyn RecordStore,
    assets: &'a dyn AssetGenerator,
    log: &'a dyn RenameLog,
    paths: LibraryPaths,
    policy: RollbackPolicy,
}

impl<'a> RenameApplier<'a> {
    pub fn new(
        files: &'a dyn FileStore,
        records: &'a dyn RecordStore,
        assets: &'a dyn AssetGenerator,
        log: &'a dyn RenameLog,
        paths: LibraryPaths,
    ) -> Self {
        Self {
            files,
            records,
            assets,
            log,
            paths,
            policy: RollbackPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RollbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Apply every request in order. Never fails as a whole.
    pub fn apply_all(&self, requests: &[RenameRequest]) -> Vec<RenameOutcome> {
        let outcomes: Vec<_> = requests.iter().map(|r| self.apply_one(r)).collect();
        let renamed = outcomes.iter().filter(|o| o.is_success()).count();
        info!("Rename batch finished: {} renamed, {} failed", renamed, outcomes.len() - renamed);
        outcomes
    }

    pub fn apply_one(&self, request: &RenameRequest) -> RenameOutcome {
        let old = sanitize_file_name(&request.old);
        let new = sanitize_file_name(&request.new);
        self.log.log_rename(&old, &new);

        let mut attempt = Attempt::default();
        let result = match self.try_rename(request.id, &new, &mut attempt) {
            Ok(result) => result,
            Err(failure) => {
                warn!("Rename of attachment {} failed: {}", request.id, failure.message);
                self.log.log_error(&failure.message);
                let rolled_back = self.restore_file(&attempt);
                let records_restored = self.restore_records(request.id, &attempt);
                RenameResult::Failed {
                    kind: failure.kind,
                    message: failure.message,
                    rolled_back,
                    records_restored,
                }
            }
        };

        RenameOutcome { id: request.id, old, new, result }
    }

    fn try_rename(&self, id: i64, new: &str, attempt: &mut Attempt) -> std::result::Result<RenameResult, Failure> {
        if new.is_empty() {
            return Err(Failure::new(
                FailureKind::InvalidName,
                format!("Invalid target name for attachment {}", id),
            ));
        }

        let stored = self
            .records
            .attached_file(id)
            .map_err(|e| Failure::new(FailureKind::NotFound, format!("Failed to resolve attachment {}: {}", id, e)))?;
        let current = match stored.as_deref() {
            Some(stored) => self.paths.resolve(stored),
            None => {
                return Err(Failure::new(FailureKind::NotFound, "Attachment file not found: "));
            }
        };
        if !self.files.exists(&current) {
            return Err(Failure::new(
                FailureKind::NotFound,
                format!("Attachment file not found: {}", current.display()),
            ));
        }
        let record = self
            .records
            .attachment(id)
            .map_err(|e| Failure::new(FailureKind::NotFound, format!("Failed to load attachment {}: {}", id, e)))?
            .ok_or_else(|| Failure::new(FailureKind::NotFound, format!("Attachment {} not found", id)))?;

        let (dir, target_name) = target_for(&current, new).ok_or_else(|| {
            Failure::new(FailureKind::InvalidName, format!("Invalid target name for attachment {}", id))
        })?;

        let unique_name = if dir.join(&target_name) == current {
            target_name
        } else {
            self.files.unique_filename(&dir, &target_name)
        };
        let new_path = dir.join(&unique_name);

        if self.policy == RollbackPolicy::Full {
            attempt.snapshot = Some(Snapshot {
                attached_file: stored.clone(),
                title: record.title.clone(),
                slug: record.slug.clone(),
                metadata: self.records.attachment_metadata(id).unwrap_or_else(|e| {
                    warn!("Could not snapshot metadata for attachment {}: {}", id, e);
                    None
                }),
            });
        }

        if new_path != current {
            self.files.move_file(&current, &new_path, true).map_err(|e| {
                Failure::new(
                    FailureKind::MoveFailed,
                    format!("Failed to move file from {} to {}: {}", current.display(), new_path.display(), e),
                )
            })?;
            attempt.moved = Some((current.clone(), new_path.clone()));
            debug!("Moved {:?} -> {:?}", current, new_path);
        }

        attempt.records_touched = true;
        let relative_old = self.paths.relative(&current);
        let relative_new = self.paths.relative(&new_path);
        self.records
            .update_attached_file(id, &self.paths.stored_form(&new_path))
            .map_err(Failure::post_move)?;

        let title = split_extension(&unique_name).0.to_string();
        let slug = self
            .records
            .unique_slug(&sanitize_title(&title), id, &record.status, &record.post_type, record.parent)
            .map_err(Failure::post_move)?;
        self.records
            .update_title_and_slug(id, &title, &slug)
            .map_err(Failure::post_move)?;

        let metadata = self.assets.generate(id, &new_path).map_err(|e| {
            Failure::new(
                FailureKind::PostMove,
                format!("Failed to generate metadata for attachment {}: {}", id, e),
            )
        })?;
        if is_empty_metadata(&metadata) {
            return Err(Failure::new(
                FailureKind::PostMove,
                format!("Failed to generate metadata for attachment {}", id),
            ));
        }
        self.records
            .update_attachment_metadata(id, &metadata)
            .map_err(Failure::post_move)?;

        let mut references_updated = 0;
        if relative_old != relative_new {
            let old_url = self.paths.url_for(&relative_old);
            let new_url = self.paths.url_for(&relative_new);
            references_updated += self
                .records
                .replace_references(ReferenceTable::Content, &old_url, &new_url)
                .map_err(Failure::post_move)?;
            references_updated += self
                .records
                .replace_references(ReferenceTable::Meta, &old_url, &new_url)
                .map_err(Failure::post_move)?;
        }

        info!("Renamed attachment {}: {:?} -> {:?}", id, current, new_path);
        Ok(RenameResult::Renamed {
            from: current,
            to: new_path,
            title,
            slug,
            references_updated,
        })
    }

    fn restore_file(&self, attempt: &Attempt) -> bool {
        let Some((original, moved_to)) = &attempt.moved else {
            return false;
        };
        if !self.files.exists(moved_to) {
            return false;
        }
        match self.files.move_file(moved_to, original, true) {
            Ok(()) => {
                info!("Rolled back {:?} -> {:?}", moved_to, original);
                true
            }
            Err(e) => {
                let message = format!(
                    "Rollback failed, file left at {}: {}",
                    moved_to.display(),
                    e
                );
                error!("{}", message);
                self.log.log_error(&message);
                false
            }
        }
    }

    fn restore_records(&self, id: i64, attempt: &Attempt) -> bool {
        if self.policy != RollbackPolicy::Full || !attempt.records_touched {
            return false;
        }
        let Some(snapshot) = &attempt.snapshot else {
            return false;
        };

        let restored: Result<()> = (|| {
            if let Some(stored) = &snapshot.attached_file {
                self.records.update_attached_file(id, stored)?;
            }
            self.records.update_title_and_slug(id, &snapshot.title, &snapshot.slug)?;
            if let Some(metadata) = &snapshot.metadata {
                self.records.update_attachment_metadata(id, metadata)?;
            }
            Ok(())
        })();

        match restored {
            Ok(()) => true,
            Err(e) => {
                let message = format!("Failed to restore records for attachment {}: {}", id, e);
                error!("{}", message);
                self.log.log_error(&message);
                false
            }
        }
    }
}

/// Directory and `<new>.<ext>` target name for a file.
///
/// A `new` that already ends in the original extension is not doubled.
fn target_for(current: &Path, new: &str) -> Option<(PathBuf, String)> {
    let dir = current.parent()?.to_path_buf();
    let file_name = current.file_name()?.to_str()?;
    let (_, ext) = split_extension(file_name);

    let name = match ext {
        Some(ext) => {
            let base = match strip_extension_suffix(new, ext) {
                "" => new,
                base => base,
            };
            format!("{}.{}", base, ext)
        }
        None => new.to_string(),
    };

    if split_extension(&name).0.is_empty() {
        return None;
    }
    Some((dir, name))
}

fn is_empty_metadata(metadata: &serde_json::Value) -> bool {
    match metadata {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewAttachment};
    use crate::history::History;
    use crate::library::LocalFileStore;
    use std::cell::RefCell;
    use tempfile::TempDir;

    struct FakeAssets {
        mode: AssetMode,
    }

    enum AssetMode {
        Ok,
        Fail,
        Empty,
    }

    impl AssetGenerator for FakeAssets {
        fn generate(&self, _id: i64, path: &Path) -> Result<serde_json::Value> {
            match self.mode {
                AssetMode::Ok => Ok(serde_json::json!({
                    "file": path.file_name().unwrap().to_string_lossy(),
                })),
                AssetMode::Fail => Err(RenamerError::AssetGeneration("decoder exploded".to_string())),
                AssetMode::Empty => Ok(serde_json::json!({})),
            }
        }
    }

    #[derive(Default)]
    struct MemoryLog {
        renames: RefCell<Vec<(String, String)>>,
        errors: RefCell<Vec<String>>,
    }

    impl RenameLog for MemoryLog {
        fn log_rename(&self, old: &str, new: &str) {
            self.renames.borrow_mut().push((old.to_string(), new.to_string()));
        }
        fn log_error(&self, message: &str) {
            self.errors.borrow_mut().push(message.to_string());
        }
    }

    /// File store whose moves always fail
    struct StuckFileStore;

    impl FileStore for StuckFileStore {
        fn exists(&self, path: &Path) -> bool {
            path.exists()
        }
        fn move_file(&self, _src: &Path, _dst: &Path, _overwrite: bool) -> Result<()> {
            Err(RenamerError::MoveFailed("disk is read-only".to_string()))
        }
    }

    const BASE_URL: &str = "https://example.com/uploads";

    struct Fixture {
        dir: TempDir,
        db: Database,
        log: MemoryLog,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("2024")).unwrap();
            Self {
                dir,
                db: Database::in_memory().unwrap(),
                log: MemoryLog::default(),
            }
        }

        fn base(&self) -> &Path {
            self.dir.path()
        }

        fn paths(&self) -> LibraryPaths {
            LibraryPaths::new(self.base().to_path_buf(), BASE_URL)
        }

        fn add_file(&self, relative: &str, title: &str) -> i64 {
            std::fs::write(self.base().join(relative), b"pixels").unwrap();
            self.db
                .insert_attachment(&NewAttachment {
                    title: title.to_string(),
                    attached_file: relative.to_string(),
                    ..Default::default()
                })
                .unwrap()
        }

        fn run(&self, assets: AssetMode, policy: RollbackPolicy, requests: &[RenameRequest]) -> Vec<RenameOutcome> {
            let assets = FakeAssets { mode: assets };
            RenameApplier::new(&LocalFileStore, &self.db, &assets, &self.log, self.paths())
                .with_policy(policy)
                .apply_all(requests)
        }
    }

    fn request(id: i64, old: &str, new: &str) -> RenameRequest {
        RenameRequest { id, old: old.to_string(), new: new.to_string() }
    }

    #[test]
    fn test_renames_file_record_and_references() {
        let fx = Fixture::new();
        let id = fx.add_file("2024/sunset.jpg", "sunset");
        let post = fx
            .db
            .insert_post("post", "Trip", &format!(r#"<img src="{}/2024/sunset.jpg">"#, BASE_URL))
            .unwrap();
        fx.db.set_meta(post, "hero", &format!("{}/2024/sunset.jpg", BASE_URL)).unwrap();
        let untouched = fx.db.insert_post("post", "Other", "nothing to see").unwrap();

        let outcomes = fx.run(AssetMode::Ok, RollbackPolicy::FileOnly, &[request(id, "sunset.jpg", "beach-sunset")]);

        assert_eq!(outcomes.len(), 1);
        match &outcomes[0].result {
            RenameResult::Renamed { to, title, slug, references_updated, .. } => {
                assert_eq!(to, &fx.base().join("2024/beach-sunset.jpg"));
                assert_eq!(title, "beach-sunset");
                assert_eq!(slug, "beach-sunset");
                assert_eq!(*references_updated, 2);
            }
            other => panic!("expected rename, got {:?}", other),
        }

        assert!(!fx.base().join("2024/sunset.jpg").exists());
        assert!(fx.base().join("2024/beach-sunset.jpg").exists());

        let record = fx.db.attachment(id).unwrap().unwrap();
        assert_eq!(record.title, "beach-sunset");
        assert_eq!(record.slug, "beach-sunset");
        assert_eq!(record.attached_file.as_deref(), Some("2024/beach-sunset.jpg"));
        assert_eq!(fx.db.attachment_metadata(id).unwrap().unwrap()["file"], "beach-sunset.jpg");

        assert_eq!(
            fx.db.post_content(post).unwrap().unwrap(),
            format!(r#"<img src="{}/2024/beach-sunset.jpg">"#, BASE_URL)
        );
        assert_eq!(
            fx.db.get_meta(post, "hero").unwrap().unwrap(),
            format!("{}/2024/beach-sunset.jpg", BASE_URL)
        );
        assert_eq!(fx.db.post_content(untouched).unwrap().unwrap(), "nothing to see");

        assert_eq!(fx.log.renames.borrow()[0], ("sunset.jpg".to_string(), "beach-sunset".to_string()));
        assert!(fx.log.errors.borrow().is_empty());
    }

    #[test]
    fn test_collision_gets_suffix() {
        let fx = Fixture::new();
        let id = fx.add_file("2024/sunset.jpg", "sunset");
        std::fs::write(fx.base().join("2024/beach-sunset.jpg"), b"someone else").unwrap();

        let outcomes = fx.run(AssetMode::Ok, RollbackPolicy::FileOnly, &[request(id, "sunset.jpg", "beach-sunset")]);

        assert!(outcomes[0].is_success());
        assert!(fx.base().join("2024/beach-sunset-1.jpg").exists());
        assert_eq!(std::fs::read(fx.base().join("2024/beach-sunset.jpg")).unwrap(), b"someone else");
        let record = fx.db.attachment(id).unwrap().unwrap();
        assert_eq!(record.attached_file.as_deref(), Some("2024/beach-sunset-1.jpg"));
        assert_eq!(record.title, "beach-sunset-1");
    }

    #[test]
    fn test_requests_colliding_with_each_other() {
        let fx = Fixture::new();
        let a = fx.add_file("2024/a.jpg", "a");
        let b = fx.add_file("2024/b.jpg", "b");

        let outcomes = fx.run(
            AssetMode::Ok,
            RollbackPolicy::FileOnly,
            &[request(a, "a.jpg", "photo"), request(b, "b.jpg", "photo")],
        );

        assert!(outcomes.iter().all(|o| o.is_success()));
        assert_eq!(fx.db.attached_file(a).unwrap().as_deref(), Some("2024/photo.jpg"));
        assert_eq!(fx.db.attached_file(b).unwrap().as_deref(), Some("2024/photo-1.jpg"));
        assert!(fx.base().join("2024/photo.jpg").exists());
        assert!(fx.base().join("2024/photo-1.jpg").exists());
        assert_eq!(fx.db.attachment(b).unwrap().unwrap().slug, "photo-1");
    }

    #[test]
    fn test_missing_record_is_skipped() {
        let fx = Fixture::new();
        let outcomes = fx.run(AssetMode::Ok, RollbackPolicy::FileOnly, &[request(99, "x.jpg", "y")]);

        assert_eq!(outcomes[0].failure_kind(), Some(FailureKind::NotFound));
        let errors = fx.log.errors.borrow();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Attachment file not found"));
    }

    #[test]
    fn test_missing_file_is_skipped_without_mutation() {
        let fx = Fixture::new();
        let id = fx.add_file("2024/gone.jpg", "gone");
        std::fs::remove_file(fx.base().join("2024/gone.jpg")).unwrap();

        let outcomes = fx.run(AssetMode::Ok, RollbackPolicy::FileOnly, &[request(id, "gone.jpg", "found")]);

        assert_eq!(outcomes[0].failure_kind(), Some(FailureKind::NotFound));
        let record = fx.db.attachment(id).unwrap().unwrap();
        assert_eq!(record.title, "gone");
        assert_eq!(record.attached_file.as_deref(), Some("2024/gone.jpg"));
        assert!(!fx.base().join("2024/found.jpg").exists());
        assert!(fx.log.errors.borrow()[0].contains("Attachment file not found"));
    }

    #[test]
    fn test_asset_failure_rolls_back_file_only() {
        let fx = Fixture::new();
        let id = fx.add_file("2024/sunset.jpg", "sunset");
        let post = fx
            .db
            .insert_post("post", "Trip", &format!("{}/2024/sunset.jpg", BASE_URL))
            .unwrap();

        let outcomes = fx.run(AssetMode::Fail, RollbackPolicy::FileOnly, &[request(id, "sunset.jpg", "beach-sunset")]);

        match &outcomes[0].result {
            RenameResult::Failed { kind, message, rolled_back, records_restored } => {
                assert_eq!(*kind, FailureKind::PostMove);
                assert!(message.contains("Failed to generate metadata"));
                assert!(rolled_back);
                assert!(!records_restored);
            }
            other => panic!("expected failure, got {:?}", other),
        }

        assert!(fx.base().join("2024/sunset.jpg").exists());
        assert!(!fx.base().join("2024/beach-sunset.jpg").exists());

        // Record updates written before the failure remain
        let record = fx.db.attachment(id).unwrap().unwrap();
        assert_eq!(record.attached_file.as_deref(), Some("2024/beach-sunset.jpg"));
        assert_eq!(record.title, "beach-sunset");
        assert_eq!(record.slug, "beach-sunset");

        // References are rewritten last, so they were never touched
        assert_eq!(fx.db.post_content(post).unwrap().unwrap(), format!("{}/2024/sunset.jpg", BASE_URL));
    }

    #[test]
    fn test_empty_metadata_is_a_failure() {
        let fx = Fixture::new();
        let id = fx.add_file("2024/sunset.jpg", "sunset");

        let outcomes = fx.run(AssetMode::Empty, RollbackPolicy::FileOnly, &[request(id, "sunset.jpg", "beach")]);

        assert_eq!(outcomes[0].failure_kind(), Some(FailureKind::PostMove));
        assert!(fx.base().join("2024/sunset.jpg").exists());
        assert!(fx.log.errors.borrow()[0].contains("Failed to generate metadata for attachment"));
    }

    #[test]
    fn test_full_rollback_restores_records() {
        let fx = Fixture::new();
        let id = fx.add_file("2024/sunset.jpg", "sunset");

        let outcomes = fx.run(AssetMode::Fail, RollbackPolicy::Full, &[request(id, "sunset.jpg", "beach-sunset")]);

        match &outcomes[0].result {
            RenameResult::Failed { rolled_back, records_restored, .. } => {
                assert!(rolled_back);
                assert!(records_restored);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        let record = fx.db.attachment(id).unwrap().unwrap();
        assert_eq!(record.attached_file.as_deref(), Some("2024/sunset.jpg"));
        assert_eq!(record.title, "sunset");
        assert_eq!(record.slug, "sunset");
        assert!(fx.base().join("2024/sunset.jpg").exists());
    }

    #[test]
    fn test_move_failure_touches_nothing() {
        let fx = Fixture::new();
        let id = fx.add_file("2024/sunset.jpg", "sunset");
        let assets = FakeAssets { mode: AssetMode::Ok };

        let outcomes = RenameApplier::new(&StuckFileStore, &fx.db, &assets, &fx.log, fx.paths())
            .apply_all(&[request(id, "sunset.jpg", "beach")]);

        match &outcomes[0].result {
            RenameResult::Failed { kind, message, rolled_back, .. } => {
                assert_eq!(*kind, FailureKind::MoveFailed);
                assert!(message.starts_with("Failed to move file from"));
                assert!(!rolled_back);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        let record = fx.db.attachment(id).unwrap().unwrap();
        assert_eq!(record.title, "sunset");
        assert_eq!(record.attached_file.as_deref(), Some("2024/sunset.jpg"));
    }

    #[test]
    fn test_batch_continues_after_failure() {
        let fx = Fixture::new();
        let id = fx.add_file("2024/sunset.jpg", "sunset");

        let outcomes = fx.run(
            AssetMode::Ok,
            RollbackPolicy::FileOnly,
            &[request(404, "x.jpg", "y"), request(id, "sunset.jpg", "dusk")],
        );

        assert!(!outcomes[0].is_success());
        assert!(outcomes[1].is_success());
        assert!(fx.base().join("2024/dusk.jpg").exists());
        assert_eq!(fx.log.renames.borrow().len(), 2);
    }

    #[test]
    fn test_untrusted_names_are_sanitized() {
        let fx = Fixture::new();
        let id = fx.add_file("2024/sunset.jpg", "sunset");

        let outcomes = fx.run(AssetMode::Ok, RollbackPolicy::FileOnly, &[request(id, "sunset.jpg", "../../etc/passwd")]);

        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[0].new, "etcpasswd");
        assert!(fx.base().join("2024/etcpasswd.jpg").exists());
    }

    #[test]
    fn test_name_that_sanitizes_to_nothing_is_rejected() {
        let fx = Fixture::new();
        let id = fx.add_file("2024/sunset.jpg", "sunset");

        let outcomes = fx.run(AssetMode::Ok, RollbackPolicy::FileOnly, &[request(id, "sunset.jpg", "../")]);

        assert_eq!(outcomes[0].failure_kind(), Some(FailureKind::InvalidName));
        assert!(fx.base().join("2024/sunset.jpg").exists());
    }

    #[test]
    fn test_same_name_does_not_gain_suffix() {
        let fx = Fixture::new();
        let id = fx.add_file("2024/sunset.jpg", "Old Title");

        let outcomes = fx.run(AssetMode::Ok, RollbackPolicy::FileOnly, &[request(id, "sunset.jpg", "sunset")]);

        assert!(outcomes[0].is_success());
        assert!(fx.base().join("2024/sunset.jpg").exists());
        assert!(!fx.base().join("2024/sunset-1.jpg").exists());
        assert_eq!(fx.db.attachment(id).unwrap().unwrap().title, "sunset");
    }

    #[test]
    fn test_extension_in_new_name_is_not_doubled() {
        let fx = Fixture::new();
        let id = fx.add_file("2024/sunset.jpg", "sunset");

        fx.run(AssetMode::Ok, RollbackPolicy::FileOnly, &[request(id, "sunset.jpg", "beach.JPG")]);

        assert!(fx.base().join("2024/beach.jpg").exists());
    }

    #[test]
    fn test_target_for_non_ascii_names() {
        let (_, name) = target_for(Path::new("/u/slides.key"), "deck.\u{212A}ey").unwrap();
        assert_eq!(name, "deck.\u{212A}ey.key");

        let (_, name) = target_for(Path::new("/u/photo.jpg"), "café.JPG").unwrap();
        assert_eq!(name, "café.jpg");
    }

    #[test]
    fn test_kelvin_sign_does_not_abort_batch() {
        let fx = Fixture::new();
        let first = fx.add_file("2024/slides.key", "slides");
        let second = fx.add_file("2024/sunset.jpg", "sunset");

        let outcomes = fx.run(
            AssetMode::Ok,
            RollbackPolicy::FileOnly,
            &[request(first, "slides.key", "deck.\u{212A}ey"), request(second, "sunset.jpg", "beach")],
        );

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_success());
        assert!(outcomes[1].is_success());
        assert!(fx.base().join("2024/deck.\u{212A}ey.key").exists());
        assert!(fx.base().join("2024/beach.jpg").exists());
    }

    #[test]
    fn test_with_real_history_and_images() {
        let fx = Fixture::new();
        let path = fx.base().join("2024/photo.png");
        image::RgbImage::from_pixel(320, 240, image::Rgb([10, 20, 30])).save(&path).unwrap();
        let id = fx
            .db
            .insert_attachment(&NewAttachment {
                title: "photo".to_string(),
                attached_file: "2024/photo.png".to_string(),
                ..Default::default()
            })
            .unwrap();
        let history = History::new(fx.base().join("history.jsonl"));
        let assets = crate::assets::ImageAssetGenerator::default();

        let outcomes = RenameApplier::new(&LocalFileStore, &fx.db, &assets, &history, fx.paths())
            .apply_all(&[request(id, "photo.png", "Red Barn at Dawn")]);

        assert!(outcomes[0].is_success());
        assert!(fx.base().join("2024/Red-Barn-at-Dawn.png").exists());
        assert!(fx.base().join("2024/Red-Barn-at-Dawn-150x150.png").exists());
        assert_eq!(fx.db.attachment(id).unwrap().unwrap().slug, "red-barn-at-dawn");
        assert_eq!(history.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_outcome_serializes_flat() {
        let outcome = RenameOutcome {
            id: 7,
            old: "a.jpg".into(),
            new: "b".into(),
            result: RenameResult::Failed {
                kind: FailureKind::NotFound,
                message: "Attachment file not found: ".into(),
                rolled_back: false,
                records_restored: false,
            },
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["kind"], "not_found");
        assert_eq!(value["id"], 7);
    }
}
