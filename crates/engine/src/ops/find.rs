//! Query execution over the two backend strategies.
//!
//! Backends advertising `integrated_find` filter and hydrate in a single
//! read transaction. For the others the engine falls back to the two-phase
//! compatibility path: one transaction collecting bare identifiers, then
//! one short transaction per identifier to hydrate it, tolerating resources
//! deleted in between.

use crate::index::Index;
use archive_core::{
    Backend, Error, FindRequest, FindResource, ResourceLevel, Result, Retrieve,
};

impl<B: Backend> Index<B> {
    pub fn execute_find(&self, request: &FindRequest) -> Result<Vec<FindResource>> {
        if self.capabilities().integrated_find {
            self.apply_read(|tx| tx.execute_find(request))
        } else {
            // A find that pins exactly one public id needs no phase 1.
            let identifiers = match request.trivial_lookup() {
                Some(public_id) => vec![public_id.to_owned()],
                None => self.apply_read(|tx| tx.find_identifiers(request))?,
            };

            let mut resources = Vec::with_capacity(identifiers.len());
            for public_id in &identifiers {
                let expanded =
                    self.apply_read(|tx| tx.expand_resource(public_id, request))?;
                if let Some(resource) = expanded {
                    resources.push(resource);
                }
            }
            Ok(resources)
        }
    }

    pub fn execute_count(&self, request: &FindRequest) -> Result<u64> {
        if self.capabilities().integrated_find {
            self.apply_read(|tx| tx.execute_count(request))
        } else {
            let identifiers = self.apply_read(|tx| tx.find_identifiers(request))?;
            Ok(identifiers.len() as u64)
        }
    }

    /// Hydrates one resource known by its public id. Exactly one match is
    /// expected; anything else indicates a misbehaving backend.
    pub fn execute_single_resource(
        &self,
        public_id: &str,
        level: ResourceLevel,
        retrieve: Retrieve,
    ) -> Result<FindResource> {
        let mut request = FindRequest::new(level).with_identifier(level, public_id);
        request.retrieve = retrieve;

        let mut resources = self.execute_find(&request)?;
        match resources.len() {
            0 => Err(Error::UnknownResource(public_id.to_owned())),
            1 => {
                let resource = resources.remove(0);
                if resource.level == level {
                    Ok(resource)
                } else {
                    Err(Error::BackendPlugin(format!(
                        "find returned resource {public_id} at the wrong level"
                    )))
                }
            }
            _ => Err(Error::BackendPlugin(format!(
                "find returned more than one resource for {public_id}"
            ))),
        }
    }
}
