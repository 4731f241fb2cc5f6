//! Metadata and attachment accessors with optimistic concurrency: every
//! entry carries a revision, and mutations may be guarded by the revision
//! and checksum the caller last saw.

use crate::index::Index;
use archive_core::hash::content_checksum;
use archive_core::{
    Backend, ChangeKind, ContentType, Error, FileInfo, MetadataType, Result,
};
use std::collections::BTreeMap;

impl<B: Backend> Index<B> {
    pub fn lookup_metadata(
        &self,
        public_id: &str,
        kind: MetadataType,
    ) -> Result<Option<(String, i64)>> {
        self.apply_read(|tx| {
            let (id, _level) = tx
                .lookup_resource(public_id)?
                .ok_or_else(|| Error::UnknownResource(public_id.to_owned()))?;
            tx.lookup_metadata(id, kind)
        })
    }

    pub fn get_all_metadata(
        &self,
        public_id: &str,
    ) -> Result<BTreeMap<MetadataType, (String, i64)>> {
        self.apply_read(|tx| {
            let (id, _level) = tx
                .lookup_resource(public_id)?
                .ok_or_else(|| Error::UnknownResource(public_id.to_owned()))?;
            tx.get_all_metadata(id)
        })
    }

    /// Writes one metadata entry. When `precondition` carries the revision
    /// and checksum of the value being replaced, a mismatch aborts with
    /// `Error::Revision`; an entry that does not exist yet starts a fresh
    /// revision sequence whatever the precondition says. Returns the
    /// revision assigned to the new value.
    pub fn set_metadata(
        &self,
        public_id: &str,
        kind: MetadataType,
        value: &str,
        precondition: Option<(i64, &str)>,
    ) -> Result<i64> {
        self.apply_write(|tx| {
            let (id, level) = tx
                .as_read()
                .lookup_resource(public_id)?
                .ok_or_else(|| Error::UnknownResource(public_id.to_owned()))?;

            let new_revision = match tx.as_read().lookup_metadata(id, kind)? {
                Some((old_value, old_revision)) => {
                    if let Some((expected_revision, expected_checksum)) = precondition {
                        if old_revision != expected_revision
                            || content_checksum(old_value.as_bytes()) != expected_checksum
                        {
                            return Err(Error::Revision(format!(
                                "outdated revision of metadata {} on resource {public_id}",
                                kind.0
                            )));
                        }
                    }
                    old_revision + 1
                }
                None => 0,
            };

            tx.set_metadata(id, kind, value, new_revision)?;

            if kind.is_user() {
                tx.log_change(ChangeKind::UpdatedMetadata, level, public_id)?;
            }

            Ok(new_revision)
        })
    }

    /// Removes one metadata entry, with the same precondition semantics as
    /// [`Index::set_metadata`]. Returns whether the entry existed.
    pub fn delete_metadata(
        &self,
        public_id: &str,
        kind: MetadataType,
        precondition: Option<(i64, &str)>,
    ) -> Result<bool> {
        self.apply_write(|tx| {
            let (id, level) = tx
                .as_read()
                .lookup_resource(public_id)?
                .ok_or_else(|| Error::UnknownResource(public_id.to_owned()))?;

            match tx.as_read().lookup_metadata(id, kind)? {
                Some((old_value, old_revision)) => {
                    if let Some((expected_revision, expected_checksum)) = precondition {
                        if old_revision != expected_revision
                            || content_checksum(old_value.as_bytes()) != expected_checksum
                        {
                            return Err(Error::Revision(format!(
                                "outdated revision of metadata {} on resource {public_id}",
                                kind.0
                            )));
                        }
                    }

                    tx.delete_metadata(id, kind)?;
                    if kind.is_user() {
                        tx.log_change(ChangeKind::UpdatedMetadata, level, public_id)?;
                    }
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    // -- attachments -------------------------------------------------------

    pub fn lookup_attachment(
        &self,
        public_id: &str,
        content_type: ContentType,
    ) -> Result<Option<(FileInfo, i64)>> {
        self.apply_read(|tx| {
            let (id, _level) = tx
                .lookup_resource(public_id)?
                .ok_or_else(|| Error::UnknownResource(public_id.to_owned()))?;
            tx.lookup_attachment(id, content_type)
        })
    }

    pub fn list_attachments(&self, public_id: &str) -> Result<Vec<ContentType>> {
        self.apply_read(|tx| {
            let (id, _level) = tx
                .lookup_resource(public_id)?
                .ok_or_else(|| Error::UnknownResource(public_id.to_owned()))?;
            tx.list_attachments(id)
        })
    }

    /// Removes one attachment, guarded by the revision and uncompressed
    /// checksum the caller last saw. Returns whether it existed; the blob
    /// itself is scheduled for removal once the transaction commits.
    pub fn delete_attachment(
        &self,
        public_id: &str,
        content_type: ContentType,
        precondition: Option<(i64, &str)>,
    ) -> Result<bool> {
        self.apply_write(|tx| {
            let (id, level) = tx
                .as_read()
                .lookup_resource(public_id)?
                .ok_or_else(|| Error::UnknownResource(public_id.to_owned()))?;

            match tx.as_read().lookup_attachment(id, content_type)? {
                Some((info, old_revision)) => {
                    if let Some((expected_revision, expected_checksum)) = precondition {
                        if old_revision != expected_revision
                            || info.uncompressed_checksum != expected_checksum
                        {
                            return Err(Error::Revision(format!(
                                "outdated revision of attachment {} on resource {public_id}",
                                content_type.0
                            )));
                        }
                    }

                    tx.delete_attachment(id, content_type)?;
                    if content_type.is_user() {
                        tx.log_change(ChangeKind::UpdatedAttachment, level, public_id)?;
                    }
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    /// Opaque per-attachment payload owned by the storage layer, keyed by
    /// the attachment uuid.
    pub fn get_attachment_custom_data(&self, uuid: &str) -> Result<Option<Vec<u8>>> {
        self.check_custom_data_support()?;
        self.apply_read(|tx| tx.get_attachment_custom_data(uuid))
    }

    pub fn set_attachment_custom_data(&self, uuid: &str, data: &[u8]) -> Result<()> {
        self.check_custom_data_support()?;
        self.apply_write(|tx| tx.set_attachment_custom_data(uuid, data))
    }

    fn check_custom_data_support(&self) -> Result<()> {
        if self.capabilities().attachment_custom_data {
            Ok(())
        } else {
            Err(Error::NotImplemented(
                "the backend has no support for attachment custom data".into(),
            ))
        }
    }
}
