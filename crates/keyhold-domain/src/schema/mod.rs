//! Static schema metadata.
//!
//! Entities, composites and their fields are declared once as static tables.
//! Dotted paths such as `person.address.city` resolve segment by segment
//! against these tables: a relation segment continues in the related entity,
//! a composite segment continues in the composite's own field table.

mod entities;
mod types;
mod validate;

pub use types::{
    CompositeType, Entity, EnumType, FieldDescriptor, FieldKind, Link, Model, Relation,
    ScalarType,
};
pub use validate::validate_document;

/// Resolves a dotted path to its chain of field descriptors.
///
/// Returns `None` when any segment is unknown, or when a segment other than
/// the last one is a scalar or enum (nothing to descend into).
pub fn resolve_path(root: Entity, path: &str) -> Option<Vec<&'static FieldDescriptor>> {
    let mut model = Model::Entity(root);
    let mut chain = Vec::new();
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        if segment.is_empty() {
            return None;
        }
        let field = model.field(segment)?;
        chain.push(field);

        if segments.peek().is_some() {
            model = match field.kind {
                FieldKind::Relation(rel) => Model::Entity(rel.target),
                FieldKind::Composite(ty) => Model::Composite(ty),
                FieldKind::Scalar(_) | FieldKind::Enum(_) => return None,
            };
        }
    }

    Some(chain)
}

/// Returns true when `name` is a conservative identifier: ASCII letter or
/// underscore first, then letters, digits or underscores.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
