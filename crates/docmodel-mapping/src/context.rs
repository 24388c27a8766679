//! Per-pass state threaded through recursive mapping traversal.

use crate::mapping::MappingId;
use crate::object::ObjectRef;
use crate::reference::Reference;
use crate::registry::MappingRegistry;
use docmodel_core::{Error, MappingError, MappingIssue, Result, Value};

/// Lookup of managed entities by identity, used while reading so that a
/// stored link resolves to the instance the session already holds.
pub trait ReferenceSource {
    fn lookup(&self, root: MappingId, id: &Value) -> Option<ObjectRef>;
}

/// Dotted path of the value currently being visited.
#[derive(Debug, Clone, Default)]
pub struct PathTracker {
    segments: Vec<String>,
}

impl PathTracker {
    pub fn push(&mut self, segment: impl Into<String>) {
        self.segments.push(segment.into());
    }

    pub fn pop(&mut self) {
        self.segments.pop();
    }

    pub fn current(&self) -> String {
        self.segments.join(".")
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

fn render(value: Option<&Value>) -> Option<String> {
    value.map(ToString::to_string)
}

/// State for reading documents into objects.
pub struct ReadContext<'a> {
    registry: &'a MappingRegistry,
    source: Option<&'a dyn ReferenceSource>,
    pub(crate) path: PathTracker,
    issues: Vec<MappingIssue>,
    references: Vec<Reference>,
}

impl<'a> ReadContext<'a> {
    pub fn new(registry: &'a MappingRegistry) -> Self {
        Self {
            registry,
            source: None,
            path: PathTracker::default(),
            issues: Vec::new(),
            references: Vec::new(),
        }
    }

    /// Resolve stored links against `source` instead of producing references.
    pub fn with_source(mut self, source: &'a dyn ReferenceSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn registry(&self) -> &'a MappingRegistry {
        self.registry
    }

    pub(crate) fn lookup(&self, root: MappingId, id: &Value) -> Option<ObjectRef> {
        self.source.and_then(|s| s.lookup(root, id))
    }

    pub fn path(&self) -> String {
        self.path.current()
    }

    /// Record an issue at the current path.
    pub fn add_issue(&mut self, message: impl Into<String>, value: Option<&Value>) {
        self.issues.push(MappingIssue {
            message: message.into(),
            path: self.path.current(),
            value: render(value),
        });
    }

    pub(crate) fn add_reference(&mut self, reference: Reference) {
        if !self.references.contains(&reference) {
            self.references.push(reference);
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.issues.is_empty()
    }

    pub fn issues(&self) -> &[MappingIssue] {
        &self.issues
    }

    /// Unresolved links produced by this pass.
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// `Ok(value)` when the pass recorded no issues, the aggregated mapping
    /// error otherwise.
    pub fn finish<T>(self, value: T) -> Result<T> {
        if self.issues.is_empty() {
            Ok(value)
        } else {
            Err(Error::Mapping(MappingError::from(self.issues)))
        }
    }
}

/// State for writing objects into documents.
pub struct WriteContext<'a> {
    registry: &'a MappingRegistry,
    pub(crate) path: PathTracker,
    issues: Vec<MappingIssue>,
    /// Embedded objects currently being written, innermost last.
    visited: Vec<usize>,
}

impl<'a> WriteContext<'a> {
    pub fn new(registry: &'a MappingRegistry) -> Self {
        Self {
            registry,
            path: PathTracker::default(),
            issues: Vec::new(),
            visited: Vec::new(),
        }
    }

    pub fn registry(&self) -> &'a MappingRegistry {
        self.registry
    }

    pub fn path(&self) -> String {
        self.path.current()
    }

    pub fn add_issue(&mut self, message: impl Into<String>, value: Option<&Value>) {
        self.issues.push(MappingIssue {
            message: message.into(),
            path: self.path.current(),
            value: render(value),
        });
    }

    /// Enter an object; false if it is already being written further up.
    pub(crate) fn enter(&mut self, obj: &ObjectRef) -> bool {
        let addr = obj.addr();
        if self.visited.contains(&addr) {
            return false;
        }
        self.visited.push(addr);
        true
    }

    pub(crate) fn leave(&mut self) {
        self.visited.pop();
    }

    pub fn has_errors(&self) -> bool {
        !self.issues.is_empty()
    }

    pub fn issues(&self) -> &[MappingIssue] {
        &self.issues
    }

    pub fn finish<T>(self, value: T) -> Result<T> {
        if self.issues.is_empty() {
            Ok(value)
        } else {
            Err(Error::Mapping(MappingError::from(self.issues)))
        }
    }
}
