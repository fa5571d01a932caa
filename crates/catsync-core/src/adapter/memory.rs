//! In-process target catalog.
//!
//! Keeps elements, primary-key flags and foreign-key links in memory, journals
//! every write, and can seed raw elements or inject write failures. Used by the
//! engine tests and as the reference implementation of `TargetCatalog`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tracing::debug;

use super::TargetCatalog;
use crate::identity::element_guid;
use crate::model::{ElementKind, ElementProps, ForeignKeyProps, Guid, PrimaryKeyProps, TargetElement};
use crate::pipeline::PassReport;

/// One write received by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOp {
    Create { kind: ElementKind, qualified_name: String },
    Update { kind: ElementKind, qualified_name: String },
    Remove { kind: ElementKind, qualified_name: String, removed: usize },
    SetPrimaryKey { column: Guid },
    ClearPrimaryKey { column: Guid },
    SetForeignKeyLink { from: Guid, to: Guid },
}

#[derive(Debug, Clone)]
struct StoredElement {
    kind: ElementKind,
    element: TargetElement,
}

#[derive(Debug, Default)]
struct State {
    elements: BTreeMap<Guid, StoredElement>,
    primary_keys: BTreeMap<Guid, PrimaryKeyProps>,
    links: BTreeMap<(Guid, Guid), ForeignKeyProps>,
    journal: Vec<TargetOp>,
    failing: BTreeSet<String>,
    passes: Vec<PassReport>,
    not_ready: bool,
}

impl State {
    fn column_name(&self, column: &Guid) -> Result<String> {
        match self.elements.get(column) {
            Some(stored) => Ok(stored.element.qualified_name.clone()),
            None => bail!("column {} does not exist", column),
        }
    }

    fn ensure_writable(&self, qualified_name: &str) -> Result<()> {
        if self.failing.contains(qualified_name) {
            bail!("injected write failure for '{}'", qualified_name);
        }
        Ok(())
    }
}

/// Target catalog held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: RwLock<State>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an element as-is, bypassing the journal. Lets tests seed
    /// duplicates that the engine itself would never create.
    pub fn seed(&self, kind: ElementKind, element: TargetElement) {
        let mut state = self.write();
        state.elements.insert(element.guid.clone(), StoredElement { kind, element });
    }

    /// Make every write touching `qualified_name` fail.
    pub fn fail_writes_for(&self, qualified_name: &str) {
        self.write().failing.insert(qualified_name.to_string());
    }

    pub fn clear_failures(&self) {
        self.write().failing.clear();
    }

    pub fn set_ready(&self, ready: bool) {
        self.write().not_ready = !ready;
    }

    pub fn journal(&self) -> Vec<TargetOp> {
        self.read().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.write().journal.clear();
    }

    /// Qualified names created since the journal was last cleared.
    pub fn created(&self) -> Vec<String> {
        self.journal()
            .into_iter()
            .filter_map(|op| match op {
                TargetOp::Create { qualified_name, .. } => Some(qualified_name),
                _ => None,
            })
            .collect()
    }

    /// Qualified names updated since the journal was last cleared.
    pub fn updated(&self) -> Vec<String> {
        self.journal()
            .into_iter()
            .filter_map(|op| match op {
                TargetOp::Update { qualified_name, .. } => Some(qualified_name),
                _ => None,
            })
            .collect()
    }

    /// Qualified names explicitly removed since the journal was last cleared.
    pub fn removed(&self) -> Vec<String> {
        self.journal()
            .into_iter()
            .filter_map(|op| match op {
                TargetOp::Remove { qualified_name, .. } => Some(qualified_name),
                _ => None,
            })
            .collect()
    }

    pub fn elements(&self, kind: ElementKind) -> Vec<TargetElement> {
        self.read()
            .elements
            .values()
            .filter(|stored| stored.kind == kind)
            .map(|stored| stored.element.clone())
            .collect()
    }

    pub fn get(&self, kind: ElementKind, qualified_name: &str) -> Option<TargetElement> {
        self.read()
            .elements
            .values()
            .find(|stored| stored.kind == kind && stored.element.qualified_name == qualified_name)
            .map(|stored| stored.element.clone())
    }

    pub fn primary_keys(&self) -> BTreeMap<Guid, PrimaryKeyProps> {
        self.read().primary_keys.clone()
    }

    pub fn links(&self) -> Vec<(Guid, Guid, ForeignKeyProps)> {
        self.read()
            .links
            .iter()
            .map(|((from, to), props)| (from.clone(), to.clone(), props.clone()))
            .collect()
    }

    /// Reports recorded by finished passes, oldest first.
    pub fn passes(&self) -> Vec<PassReport> {
        self.read().passes.clone()
    }
}

#[async_trait]
impl TargetCatalog for MemoryCatalog {
    async fn find_by_qualified_name(&self, kind: ElementKind, qualified_name: &str) -> Result<Vec<TargetElement>> {
        Ok(self
            .read()
            .elements
            .values()
            .filter(|stored| stored.kind == kind && stored.element.qualified_name == qualified_name)
            .map(|stored| stored.element.clone())
            .collect())
    }

    async fn children_of(&self, kind: ElementKind, parent: &Guid) -> Result<Vec<TargetElement>> {
        Ok(self
            .read()
            .elements
            .values()
            .filter(|stored| stored.kind == kind && stored.element.parent_guid.as_ref() == Some(parent))
            .map(|stored| stored.element.clone())
            .collect())
    }

    async fn create(&self, kind: ElementKind, parent: Option<&Guid>, props: &ElementProps) -> Result<Guid> {
        let mut state = self.write();
        state.ensure_writable(&props.qualified_name)?;

        if let Some(parent) = parent {
            if !state.elements.contains_key(parent) {
                bail!("parent {} of '{}' does not exist", parent, props.qualified_name);
            }
        }

        let guid = element_guid(kind, &props.qualified_name);
        if state.elements.contains_key(&guid) {
            bail!("{} '{}' already exists as {}", kind, props.qualified_name, guid);
        }

        let element = TargetElement::from_props(guid.clone(), parent.cloned(), props);
        state.elements.insert(guid.clone(), StoredElement { kind, element });
        state.journal.push(TargetOp::Create {
            kind,
            qualified_name: props.qualified_name.clone(),
        });
        debug!(%kind, qualified_name = %props.qualified_name, %guid, "Created element");
        Ok(guid)
    }

    async fn update(&self, kind: ElementKind, guid: &Guid, props: &ElementProps) -> Result<()> {
        let mut state = self.write();
        state.ensure_writable(&props.qualified_name)?;

        let stored = state
            .elements
            .get_mut(guid)
            .ok_or_else(|| anyhow!("{} {} does not exist", kind, guid))?;
        stored.element.display_name = props.display_name.clone();
        stored.element.properties = props.properties.clone();

        state.journal.push(TargetOp::Update {
            kind,
            qualified_name: props.qualified_name.clone(),
        });
        Ok(())
    }

    async fn remove(&self, kind: ElementKind, guid: &Guid, qualified_name: &str) -> Result<usize> {
        let mut state = self.write();
        state.ensure_writable(qualified_name)?;

        if !state.elements.contains_key(guid) {
            bail!("{} {} ('{}') does not exist", kind, guid, qualified_name);
        }

        // Collect the owned subtree breadth-first.
        let mut doomed = vec![guid.clone()];
        let mut cursor = 0;
        while cursor < doomed.len() {
            let owner = doomed[cursor].clone();
            doomed.extend(
                state
                    .elements
                    .values()
                    .filter(|stored| stored.element.parent_guid.as_ref() == Some(&owner))
                    .map(|stored| stored.element.guid.clone()),
            );
            cursor += 1;
        }

        for guid in &doomed {
            state.elements.remove(guid);
            state.primary_keys.remove(guid);
        }
        let doomed_set: BTreeSet<&Guid> = doomed.iter().collect();
        state
            .links
            .retain(|(from, to), _| !doomed_set.contains(from) && !doomed_set.contains(to));

        state.journal.push(TargetOp::Remove {
            kind,
            qualified_name: qualified_name.to_string(),
            removed: doomed.len(),
        });
        debug!(%kind, qualified_name, removed = doomed.len(), "Removed element");
        Ok(doomed.len())
    }

    async fn set_primary_key(&self, column: &Guid, props: &PrimaryKeyProps) -> Result<()> {
        let mut state = self.write();
        let qualified_name = state.column_name(column)?;
        state.ensure_writable(&qualified_name)?;

        state.primary_keys.insert(column.clone(), props.clone());
        state.journal.push(TargetOp::SetPrimaryKey { column: column.clone() });
        Ok(())
    }

    async fn primary_keys_of(&self, table: &Guid) -> Result<BTreeMap<Guid, PrimaryKeyProps>> {
        let state = self.read();
        Ok(state
            .primary_keys
            .iter()
            .filter(|(column, _)| {
                state
                    .elements
                    .get(*column)
                    .is_some_and(|stored| stored.element.parent_guid.as_ref() == Some(table))
            })
            .map(|(column, props)| (column.clone(), props.clone()))
            .collect())
    }

    async fn clear_primary_key(&self, column: &Guid) -> Result<()> {
        let mut state = self.write();
        let qualified_name = state.column_name(column)?;
        state.ensure_writable(&qualified_name)?;

        state.primary_keys.remove(column);
        state.journal.push(TargetOp::ClearPrimaryKey { column: column.clone() });
        Ok(())
    }

    async fn foreign_key_link(&self, from: &Guid, to: &Guid) -> Result<Option<ForeignKeyProps>> {
        Ok(self.read().links.get(&(from.clone(), to.clone())).cloned())
    }

    async fn set_foreign_key_link(&self, from: &Guid, to: &Guid, props: &ForeignKeyProps) -> Result<()> {
        let mut state = self.write();
        for guid in [from, to] {
            if !state.elements.contains_key(guid) {
                bail!("column {} does not exist", guid);
            }
        }

        state.links.insert((from.clone(), to.clone()), props.clone());
        state.journal.push(TargetOp::SetForeignKeyLink {
            from: from.clone(),
            to: to.clone(),
        });
        Ok(())
    }

    async fn is_ready(&self) -> Result<bool> {
        Ok(!self.read().not_ready)
    }

    async fn record_pass(&self, report: &PassReport) -> Result<()> {
        self.write().passes.push(report.clone());
        Ok(())
    }
}
