//! Write batches assembled during flush.
//!
//! A [`Batch`] holds one [`Command`] per persister. Inside a command,
//! operations are keyed by the entity's [`TableKey`], so scheduling the same
//! entity twice in one flush leaves a single operation (the later one).

use crate::table_keys::TableKey;
use docmodel_core::{Document, Value};
use docmodel_mapping::{MappingId, ObjectRef};
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Insert,
    /// Replace guarded by the version read at load time
    Update,
    /// Replace-or-insert for entities saved with a pre-assigned identifier
    Upsert,
    Remove,
}

/// One entity write.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OperationKind,
    pub entity: ObjectRef,
    pub id: Value,
    /// Full document to store; `None` for removes
    pub document: Option<Document>,
    /// Version the stored document must still carry (updates of versioned entities)
    pub expected_version: Option<i64>,
}

/// All operations of one persister within a flush.
#[derive(Debug)]
pub struct Command {
    persister: MappingId,
    operations: IndexMap<TableKey, Operation>,
}

impl Command {
    pub fn new(persister: MappingId) -> Self {
        Self {
            persister,
            operations: IndexMap::new(),
        }
    }

    pub fn persister(&self) -> MappingId {
        self.persister
    }

    /// Add an operation, replacing any earlier one for the same key.
    pub fn add(&mut self, key: TableKey, operation: Operation) {
        if let Some(previous) = self.operations.insert(key, operation) {
            tracing::trace!(key = %key, kind = ?previous.kind, "Replaced scheduled operation");
        }
    }

    pub fn get(&self, key: TableKey) -> Option<&Operation> {
        self.operations.get(&key)
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }

    pub fn operations_mut(&mut self) -> impl Iterator<Item = &mut Operation> {
        self.operations.values_mut()
    }

    pub fn count(&self, kind: OperationKind) -> usize {
        self.operations.values().filter(|op| op.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Commands keyed by persister.
#[derive(Debug, Default)]
pub struct Batch {
    commands: IndexMap<MappingId, Command>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// The command for `persister`, created on first use.
    pub fn command(&mut self, persister: MappingId) -> &mut Command {
        self.commands
            .entry(persister)
            .or_insert_with(|| Command::new(persister))
    }

    pub fn get(&self, persister: MappingId) -> Option<&Command> {
        self.commands.get(&persister)
    }

    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.values()
    }

    pub fn into_commands(self) -> impl Iterator<Item = Command> {
        self.commands.into_values()
    }

    /// Total number of operations across commands.
    pub fn len(&self) -> usize {
        self.commands.values().map(Command::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.values().all(Command::is_empty)
    }
}
