//! Plain-data model of the archive. A write transaction mutates a staged
//! copy of [`Tables`]; the copy replaces the shared state at commit.

use archive_core::{
    ChangeRecord, ContentType, DeletionReport, Error, ExportedRecord, FileInfo,
    MetadataType, RemainingAncestor, ResourceId, ResourceLevel, Result, TagSet,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

#[derive(Debug, Clone)]
pub(crate) struct ResourceRow {
    pub level: ResourceLevel,
    pub public_id: String,
    pub parent: Option<u64>,
    pub children: Vec<u64>,
    pub main_tags: TagSet,
    pub metadata: BTreeMap<MetadataType, (String, i64)>,
    pub attachments: BTreeMap<ContentType, (FileInfo, i64)>,
    pub labels: BTreeSet<String>,
    /// Only meaningful on patients.
    pub protected: bool,
}

impl ResourceRow {
    fn new(level: ResourceLevel, public_id: &str, parent: Option<u64>) -> ResourceRow {
        ResourceRow {
            level,
            public_id: public_id.to_owned(),
            parent,
            children: Vec::new(),
            main_tags: TagSet::new(),
            metadata: BTreeMap::new(),
            attachments: BTreeMap::new(),
            labels: BTreeSet::new(),
            protected: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    next_id: u64,
    /// Keyed by internal id; the ordered map keeps enumeration stable.
    pub resources: BTreeMap<u64, ResourceRow>,
    pub by_public_id: HashMap<String, u64>,
    /// Unprotected patients in recycling order, least recently used first.
    pub patient_order: Vec<u64>,
    pub changes: Vec<ChangeRecord>,
    /// High-water mark of the change sequence, preserved across purges.
    pub last_change_seq: i64,
    pub exports: Vec<ExportedRecord>,
    pub last_export_seq: i64,
    /// Keyed by (property, shared).
    pub globals: BTreeMap<(i32, bool), String>,
    pub custom_data: HashMap<String, Vec<u8>>,
    pub kv: BTreeMap<String, BTreeMap<Vec<u8>, Vec<u8>>>,
    pub queues: BTreeMap<String, VecDeque<Vec<u8>>>,
}

impl Tables {
    pub fn row(&self, id: ResourceId) -> Result<&ResourceRow> {
        self.resources
            .get(&id.0)
            .ok_or_else(|| Error::Internal(format!("unknown internal id {}", id.0)))
    }

    pub fn row_mut(&mut self, id: ResourceId) -> Result<&mut ResourceRow> {
        self.resources
            .get_mut(&id.0)
            .ok_or_else(|| Error::Internal(format!("unknown internal id {}", id.0)))
    }

    pub fn resolve(&self, public_id: &str) -> Option<(ResourceId, ResourceLevel)> {
        let id = *self.by_public_id.get(public_id)?;
        let row = self.resources.get(&id)?;
        Some((ResourceId(id), row.level))
    }

    /// Inserts a fresh row; the caller guarantees the public id is unused.
    pub fn create_row(
        &mut self,
        level: ResourceLevel,
        public_id: &str,
        parent: Option<ResourceId>,
    ) -> ResourceId {
        let id = self.next_id;
        self.next_id += 1;

        self.resources
            .insert(id, ResourceRow::new(level, public_id, parent.map(|p| p.0)));
        self.by_public_id.insert(public_id.to_owned(), id);
        if let Some(parent) = parent {
            if let Some(row) = self.resources.get_mut(&parent.0) {
                row.children.push(id);
            }
        }
        if level == ResourceLevel::Patient {
            self.patient_order.push(id);
        }
        ResourceId(id)
    }

    /// Moves a patient to the back of the recycling order; receiving new
    /// content makes it the most recently used one.
    pub fn touch_patient(&mut self, patient: ResourceId) {
        self.patient_order.retain(|id| *id != patient.0);
        if !self.resources.get(&patient.0).map(|row| row.protected).unwrap_or(true) {
            self.patient_order.push(patient.0);
        }
    }

    /// Ancestor of `id` at `level`; `id` itself when the levels match.
    pub fn ancestor_at(&self, id: ResourceId, level: ResourceLevel) -> Result<ResourceId> {
        let mut current = id;
        loop {
            let row = self.row(current)?;
            if row.level == level {
                return Ok(current);
            }
            match row.parent {
                Some(parent) => current = ResourceId(parent),
                None => {
                    return Err(Error::Internal(format!(
                        "resource {} has no ancestor at level {level}",
                        id.0
                    )))
                }
            }
        }
    }

    /// Removes `id` with its whole subtree, then prunes ancestors left
    /// childless. Reports the deletions bottom-up with their attachment
    /// handles, plus the closest surviving ancestor.
    pub fn delete_subtree(&mut self, id: ResourceId) -> Result<DeletionReport> {
        let parent = self.row(id)?.parent;

        let mut report = DeletionReport::default();
        self.remove_recursively(id.0, &mut report);

        // Cascade upwards while ancestors become empty.
        let mut current = parent;
        let mut survivor = None;
        while let Some(ancestor) = current {
            let (children, grandparent) = {
                let row = self
                    .resources
                    .get(&ancestor)
                    .ok_or_else(|| Error::Internal(format!("unknown internal id {ancestor}")))?;
                (row.children.clone(), row.parent)
            };
            let alive: Vec<u64> = children
                .into_iter()
                .filter(|child| self.resources.contains_key(child))
                .collect();

            if alive.is_empty() {
                self.remove_single(ancestor, &mut report);
                current = grandparent;
            } else {
                if let Some(row) = self.resources.get_mut(&ancestor) {
                    row.children = alive;
                }
                survivor = Some(ancestor);
                break;
            }
        }

        if let Some(ancestor) = survivor {
            let row = self
                .resources
                .get(&ancestor)
                .ok_or_else(|| Error::Internal(format!("unknown internal id {ancestor}")))?;
            report.remaining_ancestor = Some(RemainingAncestor {
                level: row.level,
                public_id: row.public_id.clone(),
            });
        }

        Ok(report)
    }

    fn remove_recursively(&mut self, id: u64, report: &mut DeletionReport) {
        let children = match self.resources.get(&id) {
            Some(row) => row.children.clone(),
            None => return,
        };
        for child in children {
            self.remove_recursively(child, report);
        }
        self.remove_single(id, report);
    }

    fn remove_single(&mut self, id: u64, report: &mut DeletionReport) {
        if let Some(row) = self.resources.remove(&id) {
            self.by_public_id.remove(&row.public_id);
            if row.level == ResourceLevel::Patient {
                self.patient_order.retain(|patient| *patient != id);
            }
            for (_content_type, (info, _revision)) in row.attachments {
                report.files.push(info);
            }
            report.resources.push((row.level, row.public_id));
        }
    }

    pub fn total_compressed_size(&self) -> u64 {
        self.resources
            .values()
            .flat_map(|row| row.attachments.values())
            .map(|(info, _revision)| info.compressed_size)
            .sum()
    }

    pub fn total_uncompressed_size(&self) -> u64 {
        self.resources
            .values()
            .flat_map(|row| row.attachments.values())
            .map(|(info, _revision)| info.uncompressed_size)
            .sum()
    }

    pub fn count_level(&self, level: ResourceLevel) -> u64 {
        self.resources
            .values()
            .filter(|row| row.level == level)
            .count() as u64
    }
}
