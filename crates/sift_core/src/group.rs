//! Group tree used for aggregation.
//!
//! Groups live in an arena and are addressed by id. The root group always
//! exists and has no parent. Children are found through their parent id and
//! group key.

use std::sync::Arc;

use hashbrown::HashMap;
use indexmap::IndexMap;
use sift_error::{Result, SiftError};

use crate::functions::aggregate::Accumulator;
use crate::key::GroupKey;
use crate::scalar::ScalarValue;

pub type GroupId = usize;

pub const ROOT_GROUP: GroupId = 0;

#[derive(Debug, Clone)]
pub struct Group {
    pub parent: Option<GroupId>,
    pub key: GroupKey,
    /// Named aggregate state, in first-use order.
    accumulators: IndexMap<String, Accumulator>,
    children: Vec<GroupId>,
}

impl Group {
    fn new(parent: Option<GroupId>, key: GroupKey) -> Self {
        Group {
            parent,
            key,
            accumulators: IndexMap::new(),
            children: Vec::new(),
        }
    }

    pub fn children(&self) -> &[GroupId] {
        &self.children
    }
}

#[derive(Debug, Clone)]
pub struct GroupArena {
    groups: Vec<Group>,
    lookup: HashMap<(GroupId, GroupKey), GroupId>,
}

impl Default for GroupArena {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupArena {
    pub fn new() -> Self {
        GroupArena {
            groups: vec![Group::new(None, GroupKey::default())],
            lookup: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        // The root is always present.
        false
    }

    pub fn group(&self, id: GroupId) -> Result<&Group> {
        self.groups
            .get(id)
            .ok_or_else(|| SiftError::new(format!("Missing group {id}")))
    }

    /// Get the child of `parent` with the given key, creating it if needed.
    pub fn child(&mut self, parent: GroupId, key: GroupKey) -> Result<GroupId> {
        if parent >= self.groups.len() {
            return Err(SiftError::new(format!("Missing parent group {parent}")));
        }
        if let Some(&id) = self.lookup.get(&(parent, key.clone())) {
            return Ok(id);
        }

        let id = self.groups.len();
        self.groups.push(Group::new(Some(parent), key.clone()));
        self.groups[parent].children.push(id);
        self.lookup.insert((parent, key), id);

        Ok(id)
    }

    /// Fold a value into a named accumulator, creating the accumulator with
    /// `init` on first use.
    pub fn accumulate<F>(
        &mut self,
        group: GroupId,
        name: &str,
        init: F,
        value: &ScalarValue,
    ) -> Result<()>
    where
        F: FnOnce() -> Accumulator,
    {
        let group = self
            .groups
            .get_mut(group)
            .ok_or_else(|| SiftError::new(format!("Missing group {group}")))?;
        if !group.accumulators.contains_key(name) {
            group.accumulators.insert(name.to_string(), init());
        }
        match group.accumulators.get_mut(name) {
            Some(acc) => acc.update(value),
            None => Err(SiftError::new(format!("Missing accumulator '{name}'"))),
        }
    }

    /// Make sure a named accumulator exists even if no rows reach it.
    pub fn ensure_accumulator<F>(&mut self, group: GroupId, name: &str, init: F) -> Result<()>
    where
        F: FnOnce() -> Accumulator,
    {
        let group = self
            .groups
            .get_mut(group)
            .ok_or_else(|| SiftError::new(format!("Missing group {group}")))?;
        if !group.accumulators.contains_key(name) {
            group.accumulators.insert(name.to_string(), init());
        }
        Ok(())
    }

    /// Current value of a named accumulator.
    pub fn value(&self, group: GroupId, name: &str) -> Result<ScalarValue> {
        let acc = self
            .group(group)?
            .accumulators
            .get(name)
            .ok_or_else(|| {
                SiftError::execution(format!("Missing aggregate '{name}' for group {group}"))
            })?;
        acc.finalize()
    }

    pub fn clear(&mut self) {
        self.groups.truncate(1);
        self.groups[ROOT_GROUP] = Group::new(None, GroupKey::default());
        self.lookup.clear();
    }
}

/// A row resolved from a group when read.
///
/// The first columns are the group key values, followed by one column per
/// named aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    pub group: GroupId,
    pub aggregates: Arc<[String]>,
}

impl GroupRow {
    pub fn get(&self, idx: usize, groups: &GroupArena) -> Result<ScalarValue> {
        let group = groups.group(self.group)?;
        let key_len = group.key.len();
        if idx < key_len {
            return Ok(group.key.values()[idx].clone());
        }
        match self.aggregates.get(idx - key_len) {
            Some(name) => groups.value(self.group, name),
            None => Err(SiftError::execution(format!(
                "Column index {idx} out of range for group row"
            ))),
        }
    }
}
