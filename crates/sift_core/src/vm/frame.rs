use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use sift_error::{Result, SiftError};
use tempfile::TempDir;

use super::cursor::{Cursor, SlotRow};
use super::phase::PhaseTracker;
use super::stack::Stacks;
use crate::group::{GroupArena, GroupId};
use crate::program::Program;
use crate::scalar::ScalarValue;
use crate::table::{IndexId, Table};

/// Build side of a hash join.
#[derive(Debug)]
pub struct HashBuild {
    /// Slot values followed by the key values.
    pub table: Arc<Table>,
    pub width: usize,
    pub key_count: usize,
    pub index: Option<IndexId>,
}

/// All state of one run.
#[derive(Debug, Default)]
pub struct StackFrame {
    pub stacks: Stacks,
    pub slots: Vec<SlotRow>,
    pub cursors: Vec<Option<Cursor>>,
    pub tables: HashMap<String, Arc<Table>>,
    pub builds: HashMap<String, HashBuild>,
    pub groups: HashMap<String, GroupArena>,
    pub current_group: Option<GroupId>,
    pub registers: Vec<bool>,
    pub ip: usize,
    pub exit: bool,
    pub phase: PhaseTracker,
    pub rows_processed: AtomicU64,
    /// Created when the first row source opens.
    pub temp_dir: Option<TempDir>,
}

impl StackFrame {
    /// Size slots and registers for a program.
    pub fn prepare(&mut self, program: &Program) {
        self.slots.resize_with(program.slot_count, SlotRow::default);
        self.cursors.resize_with(program.slot_count, || None);
        self.registers.resize(program.register_count, false);
    }

    /// Reset to an empty frame. Open sources are dropped and the temporary
    /// directory is removed.
    pub fn clear(&mut self) {
        self.stacks.clear();
        // Cursors first so background producers stop before their slots go.
        self.cursors.clear();
        self.slots.clear();
        self.tables.clear();
        self.builds.clear();
        self.groups.clear();
        self.current_group = None;
        self.registers.clear();
        self.ip = 0;
        self.exit = false;
        self.phase = PhaseTracker::default();
        self.rows_processed.store(0, Ordering::Relaxed);
        self.temp_dir = None;
    }

    pub fn is_clear(&self) -> bool {
        self.stacks.is_empty()
            && self.cursors.is_empty()
            && self.tables.is_empty()
            && self.groups.is_empty()
            && self.temp_dir.is_none()
            && self.ip == 0
    }

    pub fn column_value(&self, slot: usize, index: usize) -> Result<ScalarValue> {
        self.slots
            .get(slot)
            .ok_or_else(|| SiftError::new(format!("Slot {slot} out of range")))?
            .value(index, &self.groups)
    }

    pub fn set_slot(&mut self, slot: usize, row: SlotRow) -> Result<()> {
        let current = self
            .slots
            .get_mut(slot)
            .ok_or_else(|| SiftError::new(format!("Slot {slot} out of range")))?;
        *current = row;
        Ok(())
    }

    pub fn set_cursor(&mut self, slot: usize, cursor: Option<Cursor>) -> Result<()> {
        let current = self
            .cursors
            .get_mut(slot)
            .ok_or_else(|| SiftError::new(format!("Slot {slot} out of range")))?;
        *current = cursor;
        Ok(())
    }

    pub fn table(&self, name: &str) -> Result<&Arc<Table>> {
        self.tables
            .get(name)
            .ok_or_else(|| SiftError::execution(format!("Missing table '{name}'")))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .map(Arc::make_mut)
            .ok_or_else(|| SiftError::execution(format!("Missing table '{name}'")))
    }

    pub fn arena_mut(&mut self, name: &str) -> Result<&mut GroupArena> {
        self.groups
            .get_mut(name)
            .ok_or_else(|| SiftError::new(format!("Missing group arena '{name}'")))
    }

    pub fn count_row(&self) {
        self.rows_processed.fetch_add(1, Ordering::Relaxed);
    }
}
