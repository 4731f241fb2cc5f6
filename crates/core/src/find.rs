//! Structured find/count queries.
//!
//! A [`FindRequest`] names a hierarchy level, filtering constraints, and the
//! related data to hydrate on each match. Backends with integrated find
//! execute the whole request in one call; others go through the two-phase
//! find + expand strategy driven by the engine.

use crate::attachment::{ContentType, FileInfo};
use crate::metadata::MetadataType;
use crate::tags::{Tag, TagSet};
use crate::types::{ResourceId, ResourceLevel};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Filtering predicate on one tag value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    Equal(String),
    SmallerOrEqual(String),
    GreaterOrEqual(String),
    /// DICOM-style wildcard: `*` matches any run, `?` a single character.
    Wildcard(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagConstraint {
    pub tag: Tag,
    pub kind: ConstraintKind,
    pub case_sensitive: bool,
}

impl TagConstraint {
    pub fn equal(tag: Tag, value: impl Into<String>) -> TagConstraint {
        TagConstraint {
            tag,
            kind: ConstraintKind::Equal(value.into()),
            case_sensitive: true,
        }
    }

    pub fn wildcard(tag: Tag, pattern: impl Into<String>) -> TagConstraint {
        TagConstraint {
            tag,
            kind: ConstraintKind::Wildcard(pattern.into()),
            case_sensitive: false,
        }
    }

    /// Whether a stored value satisfies this constraint.
    pub fn matches(&self, value: &str) -> bool {
        let fold = |s: &str| {
            if self.case_sensitive {
                s.to_owned()
            } else {
                s.to_lowercase()
            }
        };
        let value = fold(value);
        match &self.kind {
            ConstraintKind::Equal(expected) => value == fold(expected),
            ConstraintKind::SmallerOrEqual(bound) => value <= fold(bound),
            ConstraintKind::GreaterOrEqual(bound) => value >= fold(bound),
            ConstraintKind::Wildcard(pattern) => wildcard_match(&fold(pattern), &value),
            ConstraintKind::List(allowed) => allowed.iter().any(|a| fold(a) == value),
        }
    }
}

fn wildcard_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    // Classic two-pointer scan with backtracking on the last star.
    let (mut pi, mut vi) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while vi < v.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == v[vi]) {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, vi));
            pi += 1;
        } else if let Some((sp, sv)) = star {
            pi = sp + 1;
            vi = sv + 1;
            star = Some((sp, sv + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// How the requested label set filters matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelsConstraint {
    /// Every requested label must be present.
    All,
    /// At least one requested label must be present.
    Any,
    /// None of the requested labels may be present.
    None,
}

/// Which related data to hydrate on each matching resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retrieve {
    pub main_tags: bool,
    pub metadata: bool,
    pub attachments: bool,
    pub labels: bool,
    pub parent: bool,
    /// Child public ids, per requested child level.
    pub children: BTreeSet<ResourceLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindRequest {
    pub level: ResourceLevel,
    /// Exact public-id filters, keyed by hierarchy level. A filter above
    /// the request level constrains ancestry; one below constrains the
    /// subtree.
    pub identifiers: BTreeMap<ResourceLevel, String>,
    pub constraints: Vec<TagConstraint>,
    pub labels: BTreeSet<String>,
    pub labels_constraint: LabelsConstraint,
    pub since: Option<u64>,
    pub limit: Option<u64>,
    pub retrieve: Retrieve,
}

impl FindRequest {
    pub fn new(level: ResourceLevel) -> FindRequest {
        FindRequest {
            level,
            identifiers: BTreeMap::new(),
            constraints: Vec::new(),
            labels: BTreeSet::new(),
            labels_constraint: LabelsConstraint::All,
            since: None,
            limit: None,
            retrieve: Retrieve::default(),
        }
    }

    pub fn with_identifier(mut self, level: ResourceLevel, public_id: impl Into<String>) -> Self {
        self.identifiers.insert(level, public_id.into());
        self
    }

    pub fn with_constraint(mut self, constraint: TagConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// A trivial request is a bare lookup of one public id at the request's
    /// own level: no constraints, no labels, no pagination. Such a lookup
    /// needs no dedicated find transaction; this returns the public id when
    /// the shortcut applies.
    pub fn trivial_lookup(&self) -> Option<&str> {
        if self.constraints.is_empty()
            && self.labels.is_empty()
            && self.since.is_none()
            && self.limit.is_none()
            && self.identifiers.len() == 1
        {
            self.identifiers.get(&self.level).map(String::as_str)
        } else {
            None
        }
    }
}

/// One hydrated match of a find request. Only the fields named by the
/// request's [`Retrieve`] flags are populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindResource {
    pub internal_id: ResourceId,
    pub level: ResourceLevel,
    pub public_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_public_id: Option<String>,
    pub main_tags: TagSet,
    pub metadata: BTreeMap<MetadataType, (String, i64)>,
    pub attachments: BTreeMap<ContentType, (FileInfo, i64)>,
    pub labels: BTreeSet<String>,
    pub children: BTreeMap<ResourceLevel, Vec<String>>,
}

impl FindResource {
    pub fn new(internal_id: ResourceId, level: ResourceLevel, public_id: impl Into<String>) -> FindResource {
        FindResource {
            internal_id,
            level,
            public_id: public_id.into(),
            parent_public_id: None,
            main_tags: TagSet::new(),
            metadata: BTreeMap::new(),
            attachments: BTreeMap::new(),
            labels: BTreeSet::new(),
            children: BTreeMap::new(),
        }
    }
}
