//! Content-derived public identifiers.
//!
//! A resource's public id is a deterministic hash of the identifying tags
//! of the resource and its ancestors, so re-inserting the same content
//! always maps to the same resource, on any backend.

use crate::error::{Error, Result};
use crate::tags::{self, TagSet};
use crate::types::ResourceLevel;
use sha2::{Digest, Sha256};

/// Computes the four public ids of the hierarchy an instance belongs to.
///
/// The patient id may legitimately be empty (anonymized modalities); the
/// three instance UIDs are mandatory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHasher {
    patient_id: String,
    study_uid: String,
    series_uid: String,
    sop_uid: String,
}

impl ResourceHasher {
    pub fn from_tags(tags: &TagSet) -> Result<ResourceHasher> {
        let required = |tag| {
            tags.get(tag)
                .map(str::to_owned)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    Error::ParameterOutOfRange(format!("missing identifying tag {tag}"))
                })
        };
        Ok(ResourceHasher {
            patient_id: tags.get(tags::PATIENT_ID).unwrap_or_default().to_owned(),
            study_uid: required(tags::STUDY_INSTANCE_UID)?,
            series_uid: required(tags::SERIES_INSTANCE_UID)?,
            sop_uid: required(tags::SOP_INSTANCE_UID)?,
        })
    }

    pub fn patient_hash(&self) -> String {
        hash_chain(&[&self.patient_id])
    }

    pub fn study_hash(&self) -> String {
        hash_chain(&[&self.patient_id, &self.study_uid])
    }

    pub fn series_hash(&self) -> String {
        hash_chain(&[&self.patient_id, &self.study_uid, &self.series_uid])
    }

    pub fn instance_hash(&self) -> String {
        hash_chain(&[&self.patient_id, &self.study_uid, &self.series_uid, &self.sop_uid])
    }

    pub fn hash(&self, level: ResourceLevel) -> String {
        match level {
            ResourceLevel::Patient => self.patient_hash(),
            ResourceLevel::Study => self.study_hash(),
            ResourceLevel::Series => self.series_hash(),
            ResourceLevel::Instance => self.instance_hash(),
        }
    }
}

/// Public ids are the first 20 bytes of a SHA-256 over the identifying tag
/// chain, rendered as 5 dash-separated groups of 8 hex characters.
fn hash_chain(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(44);
    for (i, byte) in digest[..20].iter().enumerate() {
        if i > 0 && i % 4 == 0 {
            out.push('-');
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Lowercase hex SHA-256 of a byte payload, used as the checksum carried by
/// attachments and revision preconditions.
pub fn content_checksum(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
