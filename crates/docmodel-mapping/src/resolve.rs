//! Dotted property paths.

use crate::mapping::{MappingId, MappingKind, Property};
use crate::registry::MappingRegistry;
use docmodel_core::{Error, MappingError, MappingIssue, Result};

/// How a resolved path segment's value is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Scalar or untyped value; the path cannot continue past it.
    Value,
    /// Embedded object stored inline.
    Embedded,
    /// Stored identifier of an entity in another collection.
    Reference,
    /// Not stored; found by querying the owning side.
    Inverse,
}

/// One resolved step of a property path.
#[derive(Debug, Clone)]
pub struct ResolvedSegment {
    /// Object mapping the property was found on
    pub owner: MappingId,
    pub property: Property,
    /// Element mapping of the property's value (arrays stripped)
    pub target: MappingId,
    /// Whether the property holds a list
    pub many: bool,
    pub relation: Relation,
}

/// Progress of resolving a dotted path.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    path: String,
    segments: Vec<String>,
    position: usize,
    resolved: Vec<ResolvedSegment>,
}

impl ResolveContext {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let segments = path.split('.').map(str::to_string).collect();
        Self {
            path,
            segments,
            position: 0,
            resolved: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The segment being resolved, if any remain.
    pub fn current_segment(&self) -> Option<&str> {
        self.segments.get(self.position).map(String::as_str)
    }

    pub fn is_complete(&self) -> bool {
        self.position >= self.segments.len()
    }

    pub fn resolved(&self) -> &[ResolvedSegment] {
        &self.resolved
    }

    pub fn into_segments(self) -> Vec<ResolvedSegment> {
        self.resolved
    }

    /// Path up to and including the current segment.
    fn prefix(&self) -> String {
        let end = (self.position + 1).min(self.segments.len());
        self.segments[..end].join(".")
    }

    fn fail(&self, message: String) -> Error {
        Error::Mapping(MappingError::from(vec![MappingIssue {
            message,
            path: self.prefix(),
            value: None,
        }]))
    }
}

impl MappingRegistry {
    /// Resolve the remaining segments of `ctx` starting at `mapping`.
    ///
    /// Fails naming the first segment that does not exist, not the whole path.
    pub fn resolve(&self, mapping: MappingId, ctx: &mut ResolveContext) -> Result<()> {
        let mut current = mapping;
        while let Some(segment) = ctx.current_segment() {
            let owner = self.element_of(current);
            let property = self
                .descendants(owner)
                .into_iter()
                .find_map(|m| {
                    self.get(m)
                        .as_object()
                        .and_then(|o| o.property(segment))
                        .map(|p| (m, p.clone()))
                });
            let Some((owner, property)) = property else {
                let message = if self.get(owner).as_object().is_some() {
                    format!("Undefined property '{}' in path '{}'.", segment, ctx.path)
                } else {
                    format!(
                        "Cannot resolve '{}' in path '{}': '{}' is not an object.",
                        segment,
                        ctx.path,
                        self.get(owner).describe()
                    )
                };
                return Err(ctx.fail(message));
            };
            let target = self.element_of(property.mapping());
            let many = matches!(self.get(property.mapping()).kind, MappingKind::Array(_));
            let relation = if property.inverse_of().is_some() {
                Relation::Inverse
            } else {
                match self.get(target).kind {
                    MappingKind::Entity(_) => Relation::Reference,
                    MappingKind::Object(_) | MappingKind::Class(_) => Relation::Embedded,
                    _ => Relation::Value,
                }
            };
            ctx.resolved.push(ResolvedSegment {
                owner,
                property,
                target,
                many,
                relation,
            });
            ctx.position += 1;
            current = target;
        }
        Ok(())
    }

    /// Resolve a whole dotted path from `mapping`.
    pub fn resolve_path(&self, mapping: MappingId, path: &str) -> Result<Vec<ResolvedSegment>> {
        let mut ctx = ResolveContext::new(path);
        self.resolve(mapping, &mut ctx)?;
        Ok(ctx.into_segments())
    }
}

#[cfg(test)]
mod tests {
    use super::{Relation, ResolveContext};
    use crate::fixtures;

    #[test]
    fn resolves_through_embedded_and_referenced_properties() {
        let registry = fixtures::registry();
        let person = registry.by_class("Person").unwrap();

        let segments = registry.resolve_path(person, "parents.address.city").unwrap();
        let relations: Vec<Relation> = segments.iter().map(|s| s.relation).collect();
        assert_eq!(
            relations,
            vec![Relation::Reference, Relation::Embedded, Relation::Value]
        );
        assert!(segments[0].many);
        assert_eq!(segments[0].target, person);
        assert!(!segments[1].many);
    }

    #[test]
    fn inverse_properties_resolve_as_inverse() {
        let registry = fixtures::registry();
        let person = registry.by_class("Person").unwrap();
        let segments = registry.resolve_path(person, "children").unwrap();
        assert_eq!(segments[0].relation, Relation::Inverse);
        assert_eq!(segments[0].property.inverse_of(), Some("parents"));
    }

    #[test]
    fn subclass_properties_are_found_from_the_root() {
        let registry = fixtures::registry();
        let person = registry.by_class("Person").unwrap();
        let dog = registry.by_class("Dog").unwrap();
        let segments = registry.resolve_path(person, "pet.breed").unwrap();
        assert_eq!(segments[1].owner, dog);
    }

    #[test]
    fn failure_names_the_offending_segment() {
        let registry = fixtures::registry();
        let person = registry.by_class("Person").unwrap();
        let err = registry
            .resolve_path(person, "address.planet.name")
            .unwrap_err();
        let issue = &err.mapping_issues()[0];
        assert_eq!(
            issue.message,
            "Undefined property 'planet' in path 'address.planet.name'."
        );
        assert_eq!(issue.path, "address.planet");
    }

    #[test]
    fn scalars_cannot_be_descended_into() {
        let registry = fixtures::registry();
        let person = registry.by_class("Person").unwrap();
        let mut ctx = ResolveContext::new("name.first");
        let err = registry.resolve(person, &mut ctx).unwrap_err();
        assert!(err.mapping_issues()[0].message.contains("is not an object"));
        assert_eq!(ctx.resolved().len(), 1);
        assert_eq!(ctx.current_segment(), Some("first"));
        assert!(!ctx.is_complete());
    }
}
