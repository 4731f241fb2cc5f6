//! DICOM tag identifiers and tag sets.
//!
//! A [`TagSet`] splits a dataset into flat string values and a structured
//! side-channel for sequences. The per-level *main tag* registry defines the
//! denormalized subset stored on each resource for fast filtering; its
//! [`main_tags_signature`] is stamped as metadata so a schema upgrade can
//! detect stale denormalization and trigger reconstruction.

use crate::error::{Error, Result};
use crate::types::ResourceLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A DICOM tag, `(group, element)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub group: u16,
    pub element: u16,
}

impl Tag {
    pub const fn new(group: u16, element: u16) -> Tag {
        Tag { group, element }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x},{:04x}", self.group, self.element)
    }
}

impl FromStr for Tag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Tag> {
        let (group, element) = s
            .split_once(',')
            .ok_or_else(|| Error::ParameterOutOfRange(format!("malformed tag: {s}")))?;
        let group = u16::from_str_radix(group, 16)
            .map_err(|_| Error::ParameterOutOfRange(format!("malformed tag: {s}")))?;
        let element = u16::from_str_radix(element, 16)
            .map_err(|_| Error::ParameterOutOfRange(format!("malformed tag: {s}")))?;
        Ok(Tag::new(group, element))
    }
}

impl Serialize for Tag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Tag, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// Identifying tags (one per level).
pub const PATIENT_ID: Tag = Tag::new(0x0010, 0x0020);
pub const STUDY_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000d);
pub const SERIES_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000e);
pub const SOP_INSTANCE_UID: Tag = Tag::new(0x0008, 0x0018);

// Patient module.
pub const PATIENT_NAME: Tag = Tag::new(0x0010, 0x0010);
pub const PATIENT_BIRTH_DATE: Tag = Tag::new(0x0010, 0x0030);
pub const PATIENT_SEX: Tag = Tag::new(0x0010, 0x0040);

// Study module.
pub const STUDY_DATE: Tag = Tag::new(0x0008, 0x0020);
pub const STUDY_TIME: Tag = Tag::new(0x0008, 0x0030);
pub const STUDY_ID: Tag = Tag::new(0x0020, 0x0010);
pub const STUDY_DESCRIPTION: Tag = Tag::new(0x0008, 0x1030);
pub const ACCESSION_NUMBER: Tag = Tag::new(0x0008, 0x0050);
pub const REFERRING_PHYSICIAN_NAME: Tag = Tag::new(0x0008, 0x0090);
pub const INSTITUTION_NAME: Tag = Tag::new(0x0008, 0x0080);

// Series module.
pub const MODALITY: Tag = Tag::new(0x0008, 0x0060);
pub const SERIES_NUMBER: Tag = Tag::new(0x0020, 0x0011);
pub const SERIES_DATE: Tag = Tag::new(0x0008, 0x0021);
pub const SERIES_TIME: Tag = Tag::new(0x0008, 0x0031);
pub const SERIES_DESCRIPTION: Tag = Tag::new(0x0008, 0x103e);
pub const BODY_PART_EXAMINED: Tag = Tag::new(0x0018, 0x0015);
pub const STATION_NAME: Tag = Tag::new(0x0008, 0x1010);

// Instance module.
pub const SOP_CLASS_UID: Tag = Tag::new(0x0008, 0x0016);
pub const INSTANCE_NUMBER: Tag = Tag::new(0x0020, 0x0013);
pub const IMAGE_INDEX: Tag = Tag::new(0x0054, 0x1330);
pub const NUMBER_OF_FRAMES: Tag = Tag::new(0x0028, 0x0008);
pub const INSTANCE_CREATION_DATE: Tag = Tag::new(0x0008, 0x0012);
pub const INSTANCE_CREATION_TIME: Tag = Tag::new(0x0008, 0x0013);

// Vendor tags feeding the expected-instance-count heuristics.
pub const IMAGES_IN_ACQUISITION: Tag = Tag::new(0x0020, 0x1002);
pub const NUMBER_OF_TEMPORAL_POSITIONS: Tag = Tag::new(0x0020, 0x0105);
pub const NUMBER_OF_SLICES: Tag = Tag::new(0x0054, 0x0081);
pub const NUMBER_OF_TIME_SLICES: Tag = Tag::new(0x0054, 0x0101);
pub const CARDIAC_NUMBER_OF_IMAGES: Tag = Tag::new(0x0018, 0x1090);

/// A dataset: flat string values plus structured sequences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet {
    values: BTreeMap<Tag, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    sequences: BTreeMap<Tag, serde_json::Value>,
}

impl TagSet {
    pub fn new() -> TagSet {
        TagSet::default()
    }

    pub fn set(&mut self, tag: Tag, value: impl Into<String>) -> &mut Self {
        self.values.insert(tag, value.into());
        self
    }

    pub fn set_sequence(&mut self, tag: Tag, value: serde_json::Value) -> &mut Self {
        self.sequences.insert(tag, value);
        self
    }

    pub fn get(&self, tag: Tag) -> Option<&str> {
        self.values.get(&tag).map(String::as_str)
    }

    /// Value of `tag` parsed as an integer; `None` when absent or
    /// unparsable. Leading/trailing padding is tolerated.
    pub fn get_integer(&self, tag: Tag) -> Option<i64> {
        self.get(tag)?.trim().parse().ok()
    }

    pub fn remove(&mut self, tag: Tag) -> Option<String> {
        self.values.remove(&tag)
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.values.contains_key(&tag)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.sequences.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Tag, &str)> {
        self.values.iter().map(|(t, v)| (t, v.as_str()))
    }

    pub fn sequences(&self) -> &BTreeMap<Tag, serde_json::Value> {
        &self.sequences
    }

    /// The subset of flat values whose tags belong to the main-tag registry
    /// of `level`.
    pub fn extract_main_tags(&self, level: ResourceLevel) -> TagSet {
        let registry = main_tags(level);
        let mut out = TagSet::new();
        for (tag, value) in &self.values {
            if registry.contains(tag) {
                out.set(*tag, value.clone());
            }
        }
        out
    }
}

/// Denormalized queryable tags stored per resource at each level.
pub fn main_tags(level: ResourceLevel) -> &'static [Tag] {
    match level {
        ResourceLevel::Patient => &[
            PATIENT_ID,
            PATIENT_NAME,
            PATIENT_BIRTH_DATE,
            PATIENT_SEX,
        ],
        ResourceLevel::Study => &[
            STUDY_INSTANCE_UID,
            STUDY_DATE,
            STUDY_TIME,
            STUDY_ID,
            STUDY_DESCRIPTION,
            ACCESSION_NUMBER,
            REFERRING_PHYSICIAN_NAME,
            INSTITUTION_NAME,
        ],
        ResourceLevel::Series => &[
            SERIES_INSTANCE_UID,
            MODALITY,
            SERIES_NUMBER,
            SERIES_DATE,
            SERIES_TIME,
            SERIES_DESCRIPTION,
            BODY_PART_EXAMINED,
            STATION_NAME,
            NUMBER_OF_FRAMES,
            IMAGES_IN_ACQUISITION,
            NUMBER_OF_TEMPORAL_POSITIONS,
            NUMBER_OF_SLICES,
            NUMBER_OF_TIME_SLICES,
            CARDIAC_NUMBER_OF_IMAGES,
        ],
        ResourceLevel::Instance => &[
            SOP_INSTANCE_UID,
            SOP_CLASS_UID,
            INSTANCE_NUMBER,
            IMAGE_INDEX,
            NUMBER_OF_FRAMES,
            INSTANCE_CREATION_DATE,
            INSTANCE_CREATION_TIME,
        ],
    }
}

/// Semicolon-joined list of the main tags at `level`. Stored as metadata on
/// every resource so a later version can detect that the denormalized tags
/// were written under an older registry.
pub fn main_tags_signature(level: ResourceLevel) -> String {
    let mut out = String::new();
    for (i, tag) in main_tags(level).iter().enumerate() {
        if i > 0 {
            out.push(';');
        }
        out.push_str(&tag.to_string());
    }
    out
}

/// The identifying tag for `level`, whose value feeds the public-id hash
/// chain.
pub fn identifying_tag(level: ResourceLevel) -> Tag {
    match level {
        ResourceLevel::Patient => PATIENT_ID,
        ResourceLevel::Study => STUDY_INSTANCE_UID,
        ResourceLevel::Series => SERIES_INSTANCE_UID,
        ResourceLevel::Instance => SOP_INSTANCE_UID,
    }
}
