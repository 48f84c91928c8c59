//! Hierarchy Engine
//!
//! Parent/child edges are stored as a materialized transitive closure in
//! `record_path`. A row `(hop_parent, hop_child, ancestor)` says that the hop
//! `hop_parent -> hop_child` lies below `ancestor`; the direct edge itself is
//! the row whose ancestor is its own hop parent.
//!
//! # Edge insertion
//!
//! Adding `parent -> child` combines two sets:
//!
//! - `ancestors`: `{parent}` plus every ancestor recorded for hops ending at
//!   `parent`
//! - `hops`: `(parent, child)` plus every hop recorded below `child`
//!
//! and writes `(p, c, a)` for each hop and each ancestor. Removal computes the
//! same sets and deletes those rows. The cost of either is
//! `|ancestors| x |hops|` rows. Cycles are not detected.

use crate::config::MIN_CHUNK_SIZE;
use crate::db::{in_transaction, placeholders, Session};
use crate::models::RecordId;
use crate::services::error::RecordError;
use std::collections::BTreeSet;

const PATH_COLUMNS: usize = 3;

/// How a hierarchy connector relates the queried records to its targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathDirection {
    /// Direct children of the targets
    ChildOf,
    /// Direct parents of the targets
    ParentOf,
    /// All descendants of the targets
    Below,
    /// All ancestors of the targets
    Above,
}

impl PathDirection {
    /// Column matched against the connector targets
    pub(crate) fn source_column(self) -> &'static str {
        match self {
            PathDirection::ChildOf => "hop_parent_id",
            PathDirection::ParentOf => "hop_child_id",
            PathDirection::Below => "ancestor_id",
            PathDirection::Above => "hop_child_id",
        }
    }

    /// Column joined to the queried record
    pub(crate) fn selected_column(self) -> &'static str {
        match self {
            PathDirection::ChildOf => "hop_child_id",
            PathDirection::ParentOf => "hop_parent_id",
            PathDirection::Below => "hop_child_id",
            PathDirection::Above => "ancestor_id",
        }
    }

    /// Restrict to direct edges (`ancestor == hop_parent`)
    pub(crate) fn direct_only(self) -> bool {
        matches!(self, PathDirection::ChildOf | PathDirection::ParentOf)
    }
}

/// Closure-table maintenance
#[derive(Clone)]
pub struct HierarchyEngine {
    session: Session,
    chunk_size: usize,
}

impl HierarchyEngine {
    /// `chunk_size` below 3 is raised to 3
    pub fn new(session: Session, chunk_size: usize) -> Self {
        Self {
            session,
            chunk_size: chunk_size.max(MIN_CHUNK_SIZE),
        }
    }

    /// Add the edge `parent -> child` without checking whether it exists
    ///
    /// Closure rows are written with insert-or-ignore, so re-adding an edge
    /// leaves the table unchanged.
    pub async fn add_edge(&self, parent: RecordId, child: RecordId) -> Result<(), RecordError> {
        in_transaction(&self.session, move || async move {
            let rows = self.closure_rows(parent, child).await?;
            self.insert_rows(&rows).await?;
            tracing::debug!("Saved path {} -> {} ({} closure row(s))", parent, child, rows.len());
            Ok(())
        })
        .await
    }

    /// Remove the edge `parent -> child` and the closure rows it implied
    pub async fn remove_edge(&self, parent: RecordId, child: RecordId) -> Result<(), RecordError> {
        in_transaction(&self.session, move || async move {
            let rows = self.closure_rows(parent, child).await?;
            self.delete_rows(&rows).await?;
            tracing::debug!("Removed path {} -> {} ({} closure row(s))", parent, child, rows.len());
            Ok(())
        })
        .await
    }

    /// Make every record in `children` a direct child of `parent`
    ///
    /// Children already directly below `parent` are skipped.
    pub async fn add_children(
        &self,
        parent: RecordId,
        children: &[RecordId],
    ) -> Result<(), RecordError> {
        in_transaction(&self.session, move || async move {
            let existing = self.direct_children(parent, children).await?;
            for child in unique(children).into_iter().filter(|c| !existing.contains(c)) {
                self.add_edge(parent, child).await?;
            }
            Ok(())
        })
        .await
    }

    /// Make every record in `parents` a direct parent of `child`
    pub async fn add_parents(
        &self,
        child: RecordId,
        parents: &[RecordId],
    ) -> Result<(), RecordError> {
        in_transaction(&self.session, move || async move {
            let existing = self.direct_parents(child, parents).await?;
            for parent in unique(parents).into_iter().filter(|p| !existing.contains(p)) {
                self.add_edge(parent, child).await?;
            }
            Ok(())
        })
        .await
    }

    /// Detach the given direct children from `parent`
    ///
    /// Records that are not direct children are ignored, so closure rows
    /// justified by other edges are left alone.
    pub async fn remove_children(
        &self,
        parent: RecordId,
        children: &[RecordId],
    ) -> Result<(), RecordError> {
        in_transaction(&self.session, move || async move {
            for child in self.direct_children(parent, children).await? {
                self.remove_edge(parent, child).await?;
            }
            Ok(())
        })
        .await
    }

    /// Detach `child` from the given direct parents
    pub async fn remove_parents(
        &self,
        child: RecordId,
        parents: &[RecordId],
    ) -> Result<(), RecordError> {
        in_transaction(&self.session, move || async move {
            for parent in self.direct_parents(child, parents).await? {
                self.remove_edge(parent, child).await?;
            }
            Ok(())
        })
        .await
    }

    /// Drop the records from the hierarchy
    ///
    /// Each direct edge touching a record is removed first so the records'
    /// ancestors lose the rows reaching through it; any remaining row that
    /// mentions a record is then deleted. The caller provides the transaction.
    pub(crate) async fn remove_records(&self, ids: &[i64]) -> Result<u64, RecordError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let list = placeholders(ids.len());
        let params: Vec<libsql::Value> = ids.iter().map(|id| libsql::Value::Integer(*id)).collect();

        let mut edges = BTreeSet::new();
        for column in ["hop_parent_id", "hop_child_id"] {
            let mut rows = self
                .session
                .query(
                    &format!(
                        "SELECT hop_parent_id, hop_child_id FROM record_path
                         WHERE ancestor_id = hop_parent_id AND {} IN ({})",
                        column, list
                    ),
                    params.clone(),
                )
                .await?;
            while let Some(row) = rows.next().await? {
                edges.insert((RecordId(row.get::<i64>(0)?), RecordId(row.get::<i64>(1)?)));
            }
        }

        for (parent, child) in &edges {
            self.remove_edge(*parent, *child).await?;
        }

        let mut removed = 0;
        for column in ["hop_parent_id", "hop_child_id", "ancestor_id"] {
            removed += self
                .session
                .execute(
                    &format!("DELETE FROM record_path WHERE {} IN ({})", column, list),
                    params.clone(),
                )
                .await?;
        }
        Ok(removed)
    }

    /// The (hop parent, hop child, ancestor) rows implied by one edge
    async fn closure_rows(
        &self,
        parent: RecordId,
        child: RecordId,
    ) -> Result<Vec<(i64, i64, i64)>, RecordError> {
        let mut ancestors: BTreeSet<i64> = self
            .session
            .query_ids(
                "SELECT DISTINCT ancestor_id FROM record_path WHERE hop_child_id = ?",
                vec![libsql::Value::Integer(parent.get())],
            )
            .await?
            .into_iter()
            .collect();
        ancestors.insert(parent.get());

        let mut hops = BTreeSet::new();
        hops.insert((parent.get(), child.get()));
        let mut rows = self
            .session
            .query(
                "SELECT DISTINCT hop_parent_id, hop_child_id FROM record_path
                 WHERE ancestor_id = ?",
                vec![libsql::Value::Integer(child.get())],
            )
            .await?;
        while let Some(row) = rows.next().await? {
            hops.insert((row.get::<i64>(0)?, row.get::<i64>(1)?));
        }

        Ok(hops
            .iter()
            .flat_map(|(p, c)| ancestors.iter().map(move |a| (*p, *c, *a)))
            .collect())
    }

    async fn insert_rows(&self, rows: &[(i64, i64, i64)]) -> Result<(), RecordError> {
        let rows_per_statement = (self.chunk_size / PATH_COLUMNS).max(1);
        for batch in rows.chunks(rows_per_statement) {
            let values = vec!["(?, ?, ?)"; batch.len()].join(", ");
            self.session
                .execute(
                    &format!(
                        "INSERT OR IGNORE INTO record_path
                         (hop_parent_id, hop_child_id, ancestor_id) VALUES {}",
                        values
                    ),
                    row_params(batch),
                )
                .await?;
        }
        Ok(())
    }

    async fn delete_rows(&self, rows: &[(i64, i64, i64)]) -> Result<(), RecordError> {
        let rows_per_statement = (self.chunk_size / PATH_COLUMNS).max(1);
        for batch in rows.chunks(rows_per_statement) {
            let values = vec!["(?, ?, ?)"; batch.len()].join(", ");
            self.session
                .execute(
                    &format!(
                        "DELETE FROM record_path
                         WHERE (hop_parent_id, hop_child_id, ancestor_id) IN (VALUES {})",
                        values
                    ),
                    row_params(batch),
                )
                .await?;
        }
        Ok(())
    }

    /// Which of `candidates` are direct children of `parent`
    async fn direct_children(
        &self,
        parent: RecordId,
        candidates: &[RecordId],
    ) -> Result<BTreeSet<RecordId>, RecordError> {
        self.direct_edges(
            "SELECT hop_child_id FROM record_path
             WHERE hop_parent_id = ? AND ancestor_id = hop_parent_id AND hop_child_id IN",
            parent,
            candidates,
        )
        .await
    }

    /// Which of `candidates` are direct parents of `child`
    async fn direct_parents(
        &self,
        child: RecordId,
        candidates: &[RecordId],
    ) -> Result<BTreeSet<RecordId>, RecordError> {
        self.direct_edges(
            "SELECT hop_parent_id FROM record_path
             WHERE hop_child_id = ? AND ancestor_id = hop_parent_id AND hop_parent_id IN",
            child,
            candidates,
        )
        .await
    }

    async fn direct_edges(
        &self,
        prefix: &str,
        anchor: RecordId,
        candidates: &[RecordId],
    ) -> Result<BTreeSet<RecordId>, RecordError> {
        let mut found = BTreeSet::new();
        for chunk in candidates.chunks(self.chunk_size - 1) {
            let mut params = vec![libsql::Value::Integer(anchor.get())];
            params.extend(chunk.iter().map(|c| libsql::Value::Integer(c.get())));
            let ids = self
                .session
                .query_ids(&format!("{} ({})", prefix, placeholders(chunk.len())), params)
                .await?;
            found.extend(ids.into_iter().map(RecordId));
        }
        Ok(found)
    }
}

fn unique(ids: &[RecordId]) -> BTreeSet<RecordId> {
    ids.iter().copied().collect()
}

fn row_params(rows: &[(i64, i64, i64)]) -> Vec<libsql::Value> {
    rows.iter()
        .flat_map(|(p, c, a)| {
            [
                libsql::Value::Integer(*p),
                libsql::Value::Integer(*c),
                libsql::Value::Integer(*a),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_columns() {
        assert_eq!(PathDirection::ChildOf.source_column(), "hop_parent_id");
        assert_eq!(PathDirection::ChildOf.selected_column(), "hop_child_id");
        assert_eq!(PathDirection::Above.source_column(), "hop_child_id");
        assert_eq!(PathDirection::Above.selected_column(), "ancestor_id");
        assert!(PathDirection::ParentOf.direct_only());
        assert!(!PathDirection::Below.direct_only());
    }

    #[test]
    fn test_row_params_flatten_in_order() {
        let params = row_params(&[(1, 2, 3)]);
        assert_eq!(params.len(), 3);
        assert!(matches!(params[2], libsql::Value::Integer(3)));
    }

    #[tokio::test]
    async fn test_tiny_chunk_size_is_raised() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db = crate::db::DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let session = db.session().await.unwrap();
        let hierarchy = HierarchyEngine::new(session.clone(), 1);
        assert_eq!(hierarchy.chunk_size, MIN_CHUNK_SIZE);

        let parent = RecordId(1);
        let children: Vec<RecordId> = (2..9).map(RecordId).collect();
        hierarchy.add_children(parent, &children).await.unwrap();
        hierarchy.add_children(parent, &children).await.unwrap();
        hierarchy.remove_children(parent, &children[..4]).await.unwrap();

        let mut rows = session
            .query("SELECT COUNT(*) FROM record_path", vec![])
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 3);
    }
}
