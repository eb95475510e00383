//! Resolution of the fields introduced by type extensions.
//!
//! Delegated fields are found once their parent data is known, then resolved concurrently.
//! Delegated results may contain delegated fields of their own, which are resolved in the
//! next round.

use apollo_compiler::Node;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::SelectionSet;
use futures::future::join_all;
use tracing::Instrument;

use super::ExecutionScope;
use super::fields::argument_values;
use super::fields::collect_fields;
use super::forward::Printer;
use super::forward::REQUIRED_PREFIX;
use crate::error::DelegationError;
use crate::error::FetchError;
use crate::graphql;
use crate::graphql::Error;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::stitching::DelegationBinding;

/// A delegated field waiting for its upstream call.
struct Pending<'a> {
    binding: &'a DelegationBinding,
    key: &'a str,
    fields: Vec<&'a Node<Field>>,
    /// Path of the object the field belongs to.
    parent: Path,
    requirements: Result<Object, DelegationError>,
}

impl<'a> Pending<'a> {
    fn path(&self) -> Path {
        self.parent.join(self.key)
    }

    fn selection_sets(&self) -> Vec<&'a SelectionSet> {
        self.fields
            .iter()
            .copied()
            .map(|field| &field.selection_set)
            .collect()
    }

    fn type_name(&self) -> &'a str {
        self.fields
            .first()
            .copied()
            .map(|field| field.definition.ty.inner_named_type().as_str())
            .unwrap_or_default()
    }
}

/// Resolves every delegated field selected under `root`, inserting results in place.
pub(super) async fn resolve_extensions<'a>(
    scope: &ExecutionScope<'a>,
    root: &mut Value,
    errors: &mut Vec<Error>,
    type_name: &str,
    selection_sets: &[&'a SelectionSet],
) {
    let mut pending = Vec::new();
    collect_pending(
        scope,
        root,
        type_name,
        selection_sets,
        Path::empty(),
        &mut pending,
    );

    resolve_pending(scope, root, errors, pending).await;
}

/// Resolves a single root field of a mutation: the field itself when a type extension added
/// it, otherwise the delegated fields nested in its forwarded result.
pub(super) async fn resolve_root_field<'a>(
    scope: &ExecutionScope<'a>,
    root: &mut Value,
    errors: &mut Vec<Error>,
    type_name: &str,
    key: &'a str,
    fields: &[&'a Node<Field>],
) {
    let Some(first) = fields.first() else {
        return;
    };
    let mut pending = Vec::new();
    if let Some(binding) = scope.schema.binding(type_name, first.name.as_str()) {
        pending.push(Pending {
            binding,
            key,
            fields: fields.to_vec(),
            parent: Path::empty(),
            requirements: requirements(binding, &Object::new()),
        });
    } else if let Some(child) = root.get(key) {
        let child_sets: Vec<&'a SelectionSet> =
            fields.iter().map(|field| &field.selection_set).collect();
        collect_pending(
            scope,
            child,
            first.definition.ty.inner_named_type().as_str(),
            &child_sets,
            Path::empty().join(key),
            &mut pending,
        );
    }
    resolve_pending(scope, root, errors, pending).await;
}

async fn resolve_pending<'a>(
    scope: &ExecutionScope<'a>,
    root: &mut Value,
    errors: &mut Vec<Error>,
    mut pending: Vec<Pending<'a>>,
) {
    while !pending.is_empty() {
        let results = join_all(pending.iter().map(|pending| delegate(scope, pending))).await;
        let mut next = Vec::new();
        for (pending, (value, delegation_errors)) in pending.into_iter().zip(results) {
            errors.extend(delegation_errors);
            collect_pending(
                scope,
                &value,
                pending.type_name(),
                &pending.selection_sets(),
                pending.path(),
                &mut next,
            );
            match root.get_path_mut(pending.parent.as_ref()) {
                Some(Value::Object(parent)) => {
                    parent.insert(pending.key, value);
                }
                _ => tracing::debug!(path = %pending.parent, "parent of a delegated field vanished"),
            }
        }
        pending = next;
    }
}

fn collect_pending<'a>(
    scope: &ExecutionScope<'a>,
    value: &Value,
    type_name: &str,
    selection_sets: &[&'a SelectionSet],
    path: Path,
    pending: &mut Vec<Pending<'a>>,
) {
    match value {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_pending(
                    scope,
                    item,
                    type_name,
                    selection_sets,
                    path.join(index),
                    pending,
                );
            }
        }
        Value::Object(object) => {
            let runtime_type = value.typename().unwrap_or(type_name);
            let groups = collect_fields(
                scope.schema.schema(),
                scope.document,
                scope.variables,
                runtime_type,
                selection_sets,
            );
            for (key, fields) in groups {
                let Some(first) = fields.first() else {
                    continue;
                };
                if first.name.starts_with("__") {
                    continue;
                }
                if let Some(binding) = scope.schema.binding(runtime_type, first.name.as_str()) {
                    pending.push(Pending {
                        binding,
                        key,
                        requirements: requirements(binding, object),
                        fields,
                        parent: path.clone(),
                    });
                } else if let Some(child) = object.get(key) {
                    let child_sets: Vec<&'a SelectionSet> = fields
                        .iter()
                        .copied()
                        .map(|field| &field.selection_set)
                        .collect();
                    collect_pending(
                        scope,
                        child,
                        first.definition.ty.inner_named_type().as_str(),
                        &child_sets,
                        path.join(key),
                        pending,
                    );
                }
            }
        }
        _ => {}
    }
}

/// Reads the attributes a binding depends on from the fetched parent.
fn requirements(binding: &DelegationBinding, parent: &Object) -> Result<Object, DelegationError> {
    let mut requirements = Object::new();
    for required in binding.required_fields() {
        let value = parent
            .get(format!("{REQUIRED_PREFIX}{required}").as_str())
            .ok_or_else(|| DelegationError::MissingDependency {
                type_name: binding.type_name().to_string(),
                field_name: binding.field_name().to_string(),
                attribute: required.clone(),
            })?;
        requirements.insert(required.as_str(), value.clone());
    }
    Ok(requirements)
}

async fn delegate(scope: &ExecutionScope<'_>, pending: &Pending<'_>) -> (Value, Vec<Error>) {
    let binding = pending.binding;
    let path = pending.path();
    let requirements = match &pending.requirements {
        Ok(requirements) => requirements,
        Err(error) => return (Value::Null, vec![error.to_graphql_error(path)]),
    };
    // a parent without the attribute has nothing to relate to
    if requirements.values().any(Value::is_null) {
        return (Value::Null, Vec::new());
    }

    let arguments = pending
        .fields
        .first()
        .map(|field| argument_values(field, scope.variables))
        .unwrap_or_default();
    let arguments = match binding.build_arguments(requirements, &arguments) {
        Ok(arguments) => arguments,
        Err(error) => return (Value::Null, vec![error.to_graphql_error(path)]),
    };
    let Some(source) = scope.schema.source(binding.source()) else {
        let error = FetchError::MalformedRequest {
            reason: format!("unknown source '{}'", binding.source()),
        };
        return (Value::Null, vec![error.to_graphql_error(Some(path))]);
    };

    let forwarded = Printer::new(
        scope.schema,
        scope.document,
        &scope.operation.variables,
        scope.variables,
    )
    .delegation(binding, arguments, &pending.fields);
    let request = graphql::Request::builder()
        .query(forwarded.query)
        .variables(forwarded.variables)
        .build();

    let span = tracing::info_span!(
        "delegate",
        field = %binding.coordinate(),
        source = source.name(),
        path = %path,
    );
    match source.execute(request, scope.context).instrument(span).await {
        Ok(response) => {
            let errors = response
                .errors
                .into_iter()
                .map(|error| reroot(error, &path, source.name()))
                .collect();
            let value = response
                .data
                .as_ref()
                .and_then(|data| data.get(binding.target_field()))
                .cloned()
                .unwrap_or_default();
            (value, errors)
        }
        Err(error) => {
            tracing::warn!(field = %binding.coordinate(), %error, "delegated call failed");
            (Value::Null, vec![error.to_graphql_error(Some(path))])
        }
    }
}

/// Moves an upstream error under the delegated field: the upstream root field is replaced by
/// the field's own path.
fn reroot(mut error: Error, path: &Path, service: &str) -> Error {
    error.path = Some(match &error.path {
        Some(upstream) if !upstream.is_empty() => path.concat(&upstream.0[1..]),
        _ => path.clone(),
    });
    error
        .extensions
        .entry("service")
        .or_insert_with(|| service.into());
    error
}
