//! Query evaluation against the in-memory tables. Matching walks the
//! hierarchy to resolve identifier filters and inherited tag values;
//! hydration fills a [`FindResource`] per the request's retrieve flags.

use crate::tables::{ResourceRow, Tables};
use archive_core::{
    FindRequest, FindResource, LabelsConstraint, ResourceId, Result, TagConstraint,
};

/// Internal ids of every resource matching the request, in id order, with
/// pagination applied.
pub(crate) fn matching_ids(tables: &Tables, request: &FindRequest) -> Result<Vec<ResourceId>> {
    let matches = all_matches(tables, request)?;
    let since = request.since.unwrap_or(0) as usize;
    let limit = request.limit.map(|limit| limit as usize).unwrap_or(usize::MAX);
    Ok(matches.into_iter().skip(since).take(limit).collect())
}

/// Number of matches, ignoring pagination.
pub(crate) fn count_matches(tables: &Tables, request: &FindRequest) -> Result<u64> {
    Ok(all_matches(tables, request)?.len() as u64)
}

pub(crate) fn expand(
    tables: &Tables,
    public_id: &str,
    request: &FindRequest,
) -> Result<Option<FindResource>> {
    match tables.resolve(public_id) {
        Some((id, level)) if level == request.level => Ok(Some(hydrate(tables, id, request)?)),
        _ => Ok(None),
    }
}

pub(crate) fn hydrate(
    tables: &Tables,
    id: ResourceId,
    request: &FindRequest,
) -> Result<FindResource> {
    let row = tables.row(id)?;
    let retrieve = &request.retrieve;
    let mut resource = FindResource::new(id, row.level, row.public_id.clone());

    if retrieve.main_tags {
        resource.main_tags = row.main_tags.clone();
    }
    if retrieve.metadata {
        resource.metadata = row.metadata.clone();
    }
    if retrieve.attachments {
        resource.attachments = row.attachments.clone();
    }
    if retrieve.labels {
        resource.labels = row.labels.clone();
    }
    if retrieve.parent {
        if let Some(parent) = row.parent {
            resource.parent_public_id = Some(tables.row(ResourceId(parent))?.public_id.clone());
        }
    }
    for &child_level in &retrieve.children {
        if child_level.depth() <= row.level.depth() {
            continue;
        }
        let mut public_ids = Vec::new();
        collect_descendants(tables, id, child_level, &mut public_ids)?;
        resource.children.insert(child_level, public_ids);
    }

    Ok(resource)
}

fn all_matches(tables: &Tables, request: &FindRequest) -> Result<Vec<ResourceId>> {
    let mut matches = Vec::new();
    for (&id, row) in &tables.resources {
        if row.level != request.level {
            continue;
        }
        let id = ResourceId(id);
        if identifiers_match(tables, id, row, request)?
            && constraints_match(tables, id, &request.constraints)?
            && labels_match(row, request)
        {
            matches.push(id);
        }
    }
    Ok(matches)
}

fn identifiers_match(
    tables: &Tables,
    id: ResourceId,
    row: &ResourceRow,
    request: &FindRequest,
) -> Result<bool> {
    for (level, public_id) in &request.identifiers {
        let (target, target_level) = match tables.resolve(public_id) {
            Some(found) => found,
            None => return Ok(false),
        };
        if target_level != *level {
            return Ok(false);
        }

        let matched = if target_level.depth() <= row.level.depth() {
            // Ancestry filter (or the resource itself).
            tables.ancestor_at(id, target_level)? == target
        } else {
            // Subtree filter: the target must live below this resource.
            tables.ancestor_at(target, row.level)? == id
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn constraints_match(
    tables: &Tables,
    id: ResourceId,
    constraints: &[TagConstraint],
) -> Result<bool> {
    for constraint in constraints {
        // The tag may be stored on the resource itself or inherited from
        // an ancestor's main tags.
        let mut current = id;
        let value = loop {
            let candidate = tables.row(current)?;
            if let Some(value) = candidate.main_tags.get(constraint.tag) {
                break Some(value.to_owned());
            }
            match candidate.parent {
                Some(parent) => current = ResourceId(parent),
                None => break None,
            }
        };

        match value {
            Some(value) if constraint.matches(&value) => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

fn labels_match(row: &ResourceRow, request: &FindRequest) -> bool {
    if request.labels.is_empty() {
        return true;
    }
    let present = request
        .labels
        .iter()
        .filter(|label| row.labels.contains(*label))
        .count();
    match request.labels_constraint {
        LabelsConstraint::All => present == request.labels.len(),
        LabelsConstraint::Any => present > 0,
        LabelsConstraint::None => present == 0,
    }
}

fn collect_descendants(
    tables: &Tables,
    id: ResourceId,
    level: archive_core::ResourceLevel,
    out: &mut Vec<String>,
) -> Result<()> {
    let row = tables.row(id)?;
    if row.level == level {
        out.push(row.public_id.clone());
        return Ok(());
    }
    for &child in &row.children {
        collect_descendants(tables, ResourceId(child), level, out)?;
    }
    Ok(())
}
