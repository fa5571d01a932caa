//! Reconciliation engine.
//!
//! - [`reconcile_children`] plans the create/update/remove set for one parent
//!   scope. It is pure; the pipeline applies the plan.
//! - [`reconcile_singleton`] looks up or creates an element that exists at
//!   most once per scope (database, connection, connector type, endpoint).
//! - [`foreign_keys`] resolves key links once every column exists.

pub mod foreign_keys;

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info};

use crate::adapter::TargetCatalog;
use crate::error::{SyncError, SyncResult};
use crate::model::{Descriptor, ElementKind, ElementProps, Guid, TargetElement};

pub use foreign_keys::{collect_foreign_keys, link_foreign_keys, LinkOutcome, LinkedKey};

/// Plan for one parent scope.
///
/// Every desired descriptor appears exactly once, in `matched` or `to_create`;
/// every existing element appears exactly once, in `matched` or `to_remove`.
#[derive(Debug, Clone)]
pub struct ChildPlan<D> {
    /// Desired descriptors paired with the existing element they update.
    pub matched: Vec<(D, TargetElement)>,
    pub to_create: Vec<D>,
    pub to_remove: Vec<TargetElement>,
}

impl<D> ChildPlan<D> {
    pub fn is_empty(&self) -> bool {
        self.matched.is_empty() && self.to_create.is_empty() && self.to_remove.is_empty()
    }
}

/// Partition `desired` and `existing` by qualified name.
///
/// Two existing elements with the same qualified name make the whole scope
/// ambiguous; nothing is planned and the caller skips the branch. Repeated
/// desired descriptors collapse onto the first occurrence.
pub fn reconcile_children<D: Descriptor>(desired: Vec<D>, existing: Vec<TargetElement>) -> SyncResult<ChildPlan<D>> {
    let mut index: BTreeMap<String, Vec<TargetElement>> = BTreeMap::new();
    for element in existing {
        index.entry(element.qualified_name.clone()).or_default().push(element);
    }

    if let Some((qualified_name, elements)) = index.iter().find(|(_, elements)| elements.len() > 1) {
        return Err(SyncError::ambiguous(D::KIND, qualified_name.as_str(), elements.len()));
    }

    let mut matched = Vec::new();
    let mut to_create = Vec::new();
    let mut seen = HashSet::new();

    for descriptor in desired {
        let qualified_name = descriptor.qualified_name();
        if !seen.insert(qualified_name.clone()) {
            debug!(kind = %D::KIND, %qualified_name, "Ignoring repeated descriptor");
            continue;
        }
        match index.remove(&qualified_name).and_then(|mut elements| elements.pop()) {
            Some(element) => matched.push((descriptor, element)),
            None => to_create.push(descriptor),
        }
    }

    let to_remove = index.into_values().flatten().collect();

    Ok(ChildPlan {
        matched,
        to_create,
        to_remove,
    })
}

/// Result of [`reconcile_singleton`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SingletonOutcome {
    Created(TargetElement),
    Reused(TargetElement),
}

impl SingletonOutcome {
    pub fn element(&self) -> &TargetElement {
        match self {
            Self::Created(element) | Self::Reused(element) => element,
        }
    }

    pub fn into_element(self) -> TargetElement {
        match self {
            Self::Created(element) | Self::Reused(element) => element,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Look up `props.qualified_name`; create it when absent, reuse it unchanged
/// when present once, and refuse to guess when present more than once.
pub async fn reconcile_singleton(
    target: &dyn TargetCatalog,
    kind: ElementKind,
    parent: Option<&Guid>,
    props: ElementProps,
) -> SyncResult<SingletonOutcome> {
    let mut found = target
        .find_by_qualified_name(kind, &props.qualified_name)
        .await
        .map_err(|e| SyncError::target_read("find", props.qualified_name.as_str(), e))?;

    match found.len() {
        0 => {
            let guid = target
                .create(kind, parent, &props)
                .await
                .map_err(|e| SyncError::target_write("create", props.qualified_name.as_str(), e))?;
            info!(%kind, qualified_name = %props.qualified_name, %guid, "Created singleton element");
            Ok(SingletonOutcome::Created(TargetElement::from_props(
                guid,
                parent.cloned(),
                &props,
            )))
        }
        1 => {
            let element = found.remove(0);
            debug!(%kind, qualified_name = %element.qualified_name, guid = %element.guid, "Reusing singleton element");
            Ok(SingletonOutcome::Reused(element))
        }
        count => Err(SyncError::ambiguous(kind, props.qualified_name, count)),
    }
}
