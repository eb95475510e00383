//! Shaping of the fetched data into the response.
//!
//! Fields are emitted in selection order under their response keys, helper keys added to
//! forwarded selections are dropped and null values are propagated following
//! <https://spec.graphql.org/October2021/#sec-Handling-Field-Errors>.

use apollo_compiler::Node;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::Type;

use super::ExecutionScope;
use super::fields::collect_fields;
use crate::cache::CacheHint;
use crate::cache::CacheHints;
use crate::graphql::Error;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// Returned after a null in a non-null position: the parent must become null too.
#[derive(Debug)]
pub(super) struct PropagateNull;

pub(super) struct Completion<'s, 'a> {
    scope: &'s ExecutionScope<'a>,
    root_type: &'s str,
    default_max_age: u32,
    errors: Vec<Error>,
    hints: CacheHints,
}

impl<'s, 'a> Completion<'s, 'a> {
    pub(super) fn new(
        scope: &'s ExecutionScope<'a>,
        root_type: &'s str,
        default_max_age: u32,
        errors: Vec<Error>,
    ) -> Self {
        Self {
            scope,
            root_type,
            default_max_age,
            errors,
            hints: CacheHints::default(),
        }
    }

    /// Completes the whole response. `data` is null if a null reached the root.
    pub(super) fn complete_root(
        mut self,
        data: &Object,
        selection_set: &'a SelectionSet,
    ) -> (Value, Vec<Error>, CacheHints) {
        let root_type = self.root_type;
        let data = self
            .complete_object(data, root_type, &[selection_set], &Path::empty())
            .unwrap_or(Value::Null);
        (data, self.errors, self.hints)
    }

    fn complete_object(
        &mut self,
        object: &Object,
        object_type: &str,
        selection_sets: &[&'a SelectionSet],
        path: &Path,
    ) -> Result<Value, PropagateNull> {
        let scope = self.scope;
        let groups = collect_fields(
            scope.schema.schema(),
            scope.document,
            scope.variables,
            object_type,
            selection_sets,
        );
        let mut completed = Object::new();
        for (key, fields) in groups {
            let Some(first) = fields.first().copied() else {
                continue;
            };
            let field_path = path.join(key);
            match first.name.as_str() {
                "__typename" => {
                    completed.insert(key, object_type.into());
                    continue;
                }
                "__schema" | "__type" => {
                    completed.insert(key, object.get(key).cloned().unwrap_or_default());
                    continue;
                }
                _ => {}
            }

            self.add_hint(object_type, first, &field_path);
            let value = object.get(key).unwrap_or(&Value::Null);
            let child_sets: Vec<&'a SelectionSet> = fields
                .iter()
                .copied()
                .map(|field| &field.selection_set)
                .collect();
            let value = self.complete_value(
                &first.definition.ty,
                value,
                &child_sets,
                &field_path,
                (object_type, first.name.as_str()),
            )?;
            completed.insert(key, value);
        }
        Ok(Value::Object(completed))
    }

    fn complete_value(
        &mut self,
        ty: &Type,
        value: &Value,
        selection_sets: &[&'a SelectionSet],
        path: &Path,
        coordinate: (&str, &str),
    ) -> Result<Value, PropagateNull> {
        if value.is_null() {
            return self.try_nullify(ty, path, coordinate);
        }
        match ty {
            Type::Named(_) | Type::NonNullNamed(_) => {
                let type_name = ty.inner_named_type().as_str();
                if !self.is_composite(type_name) {
                    return Ok(value.clone());
                }
                let Value::Object(object) = value else {
                    self.errors.push(
                        Error::builder()
                            .message(format!(
                                "Expected an object for field {}.{}",
                                coordinate.0, coordinate.1
                            ))
                            .path(path.clone())
                            .build(),
                    );
                    return self.try_nullify(ty, path, coordinate);
                };
                let runtime_type = object
                    .get("__typename")
                    .and_then(|typename| typename.as_str())
                    .unwrap_or(type_name)
                    .to_string();
                match self.complete_object(object, &runtime_type, selection_sets, path) {
                    Ok(completed) => Ok(completed),
                    Err(PropagateNull) => self.try_nullify(ty, path, coordinate),
                }
            }
            Type::List(item_type) | Type::NonNullList(item_type) => {
                let Value::Array(items) = value else {
                    self.errors.push(
                        Error::builder()
                            .message(format!(
                                "Expected a list for field {}.{}",
                                coordinate.0, coordinate.1
                            ))
                            .path(path.clone())
                            .build(),
                    );
                    return self.try_nullify(ty, path, coordinate);
                };
                let mut completed = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    match self.complete_value(
                        item_type,
                        item,
                        selection_sets,
                        &path.join(index),
                        coordinate,
                    ) {
                        Ok(item) => completed.push(item),
                        Err(PropagateNull) => return self.try_nullify(ty, path, coordinate),
                    }
                }
                Ok(Value::Array(completed))
            }
        }
    }

    /// Null for nullable types. Otherwise records an error, unless one already explains the
    /// null, and propagates to the parent.
    fn try_nullify(
        &mut self,
        ty: &Type,
        path: &Path,
        coordinate: (&str, &str),
    ) -> Result<Value, PropagateNull> {
        if !ty.is_non_null() {
            return Ok(Value::Null);
        }
        let explained = self.errors.iter().any(|error| {
            error
                .path
                .as_ref()
                .is_some_and(|error_path| error_path.starts_with(path))
        });
        if !explained {
            self.errors.push(
                Error::builder()
                    .message(format!(
                        "Cannot return null for non-nullable field {}.{}",
                        coordinate.0, coordinate.1
                    ))
                    .path(path.clone())
                    .build(),
            );
        }
        Err(PropagateNull)
    }

    fn is_composite(&self, type_name: &str) -> bool {
        matches!(
            self.scope.schema.schema().types.get(type_name),
            Some(ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_))
        )
    }

    /// The explicit field hint, else the hint of a composite return type. Root fields and
    /// composite fields fall back to the default `maxAge`, leaves constrain nothing.
    fn add_hint(&mut self, parent_type: &str, field: &Node<Field>, path: &Path) {
        let schema = self.scope.schema;
        let type_name = field.definition.ty.inner_named_type().as_str();
        let composite = self.is_composite(type_name);
        let mut hint = schema
            .field_hint(parent_type, field.name.as_str())
            .copied()
            .unwrap_or_default();
        if composite {
            if let Some(type_hint) = schema.type_hint(type_name) {
                hint.max_age = hint.max_age.or(type_hint.max_age);
                hint.scope = hint.scope.or(type_hint.scope);
            }
        }
        if hint.max_age.is_none()
            && !hint.inherit_max_age
            && (composite || parent_type == self.root_type)
        {
            hint = CacheHint {
                max_age: Some(self.default_max_age),
                ..hint
            };
        }
        self.hints.add(path.clone(), hint);
    }
}
