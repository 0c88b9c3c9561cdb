//! leadflow-store - SQLite persistence for the lead routing engine
//!
//! A single `LeadDb` implements every store trait from `leadflow-core`,
//! so one handle can back an `AssignmentEngine` or a `LeadPipeline`.

pub mod sqlite;

pub use sqlite::LeadDb;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use leadflow_core::StoreHandles;

/// Open (or create) the database at `path` and wrap it as store handles
pub fn open_handles<P: AsRef<Path>>(path: P) -> Result<(Arc<LeadDb>, StoreHandles)> {
    let db = Arc::new(LeadDb::new(path)?);
    let handles = StoreHandles::from_shared(db.clone());
    Ok((db, handles))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_handles_in_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, _handles) = open_handles(dir.path().join("leads.db")).unwrap();
        assert!(dir.path().join("leads.db").exists());
    }
}
