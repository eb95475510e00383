//! Execution of client operations against the stitched schema.
//!
//! Root fields are forwarded to the source that owns them, one operation per source. Fields
//! added by type extensions are then delegated, and a completion pass shapes the response and
//! computes its cache policy. Mutations resolve one root field at a time, delegated ones
//! included, in document order.

mod complete;
mod delegate;
mod fields;
mod forward;

use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;
use apollo_compiler::ast::OperationType;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Operation;
use apollo_compiler::response::GraphQLError;
use apollo_compiler::response::JsonMap;
use apollo_compiler::validation::Valid;
use futures::future::join_all;
use http::StatusCode;
use tracing::Instrument;

use self::complete::Completion;
use self::fields::collect_fields;
use self::forward::Printer;
use crate::cache::CachePolicy;
use crate::context::Context;
use crate::graphql;
use crate::graphql::Error;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::remote::RemoteSchema;
use crate::stitching::MergedSchema;
use crate::stitching::OperationKind;

const CACHE_CONTROL_EXTENSION: &str = "cacheControl";

/// Per-router execution settings.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ExecutionOptions {
    pub(crate) introspection: bool,
    pub(crate) default_max_age: u32,
    pub(crate) expose_hints: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            introspection: true,
            default_max_age: 0,
            expose_hints: false,
        }
    }
}

/// A parsed and validated operation with coerced variables.
#[derive(Debug)]
pub(crate) struct PreparedOperation {
    document: Valid<ExecutableDocument>,
    operation: Node<Operation>,
    variables: Valid<JsonMap>,
    kind: OperationKind,
}

impl PreparedOperation {
    pub(crate) fn kind(&self) -> OperationKind {
        self.kind
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.operation.name.as_ref().map(|name| name.as_str())
    }
}

/// A request refused before execution.
#[derive(Debug)]
pub(crate) struct Rejection {
    pub(crate) status: StatusCode,
    pub(crate) response: graphql::Response,
}

impl Rejection {
    fn new(status: StatusCode, errors: Vec<Error>) -> Self {
        Self {
            status,
            response: graphql::Response::from_errors(errors),
        }
    }

    fn single(status: StatusCode, message: impl Into<String>, code: &str) -> Self {
        Self::new(
            status,
            vec![
                Error::builder()
                    .message(message)
                    .extension_code(code)
                    .build(),
            ],
        )
    }
}

/// References shared by every step of one execution.
pub(crate) struct ExecutionScope<'a> {
    schema: &'a MergedSchema,
    document: &'a ExecutableDocument,
    operation: &'a Operation,
    variables: &'a JsonMap,
    context: &'a Context,
}

fn with_code(error: GraphQLError, code: &str) -> Error {
    let mut error = Error::from(error);
    error
        .extensions
        .entry("code")
        .or_insert_with(|| code.into());
    error
}

fn is_introspection(name: &str) -> bool {
    name == "__schema" || name == "__type"
}

/// Parses and validates a request against the stitched schema.
pub(crate) fn prepare(
    schema: &MergedSchema,
    request: &graphql::Request,
    options: &ExecutionOptions,
) -> Result<PreparedOperation, Rejection> {
    let query = match request.query.as_deref() {
        Some(query) if !query.trim().is_empty() => query,
        _ => {
            return Err(Rejection::single(
                StatusCode::BAD_REQUEST,
                "Must provide query string.",
                "MISSING_QUERY_STRING",
            ));
        }
    };

    let document = ExecutableDocument::parse_and_validate(schema.schema(), query, "query.graphql")
        .map_err(|e| {
            Rejection::new(
                StatusCode::BAD_REQUEST,
                e.errors
                    .iter()
                    .map(|diagnostic| with_code(diagnostic.to_json(), "GRAPHQL_VALIDATION_FAILED"))
                    .collect(),
            )
        })?;
    let operation = document
        .operations
        .get(request.operation_name.as_deref())
        .map_err(|e| {
            Rejection::new(
                StatusCode::BAD_REQUEST,
                vec![with_code(
                    e.to_graphql_error(&document.sources),
                    "GRAPHQL_VALIDATION_FAILED",
                )],
            )
        })?
        .clone();

    let kind = match operation.operation_type {
        OperationType::Query => OperationKind::Query,
        OperationType::Mutation => OperationKind::Mutation,
        OperationType::Subscription => {
            return Err(Rejection::single(
                StatusCode::BAD_REQUEST,
                "Subscriptions are not supported",
                "SUBSCRIPTION_NOT_SUPPORTED",
            ));
        }
    };

    let variables = apollo_compiler::request::coerce_variable_values(
        schema.schema(),
        &operation,
        &request.variables,
    )
    .map_err(|e| {
        Rejection::new(
            StatusCode::BAD_REQUEST,
            vec![with_code(
                e.to_graphql_error(&document.sources),
                "VALIDATION_INVALID_TYPE_VARIABLE",
            )],
        )
    })?;

    if !options.introspection {
        let root = [&operation.selection_set];
        let groups = collect_fields(
            schema.schema(),
            &document,
            &variables,
            kind.root_type_name(),
            &root,
        );
        let introspects = groups
            .values()
            .flatten()
            .any(|field| is_introspection(field.name.as_str()));
        if introspects {
            return Err(Rejection::single(
                StatusCode::BAD_REQUEST,
                "GraphQL introspection is not allowed, but the query contained __schema or __type",
                "INTROSPECTION_DISABLED",
            ));
        }
    }

    Ok(PreparedOperation {
        document,
        operation,
        variables,
        kind,
    })
}

type RootGroup<'a> = (&'a str, Vec<&'a Node<Field>>);

/// Root fields forwarded together to one source.
struct Batch<'a> {
    source: Arc<RemoteSchema>,
    groups: Vec<RootGroup<'a>>,
}

/// One unit of root field resolution, in document order.
enum RootStep<'a> {
    Forwarded(Batch<'a>),
    /// A root field added by a type extension.
    Delegated(RootGroup<'a>),
}

/// Executes a prepared operation. Field errors are part of the response, the returned policy
/// is the one computed from the cache hints of every resolved field.
pub(crate) async fn execute(
    schema: &MergedSchema,
    prepared: &PreparedOperation,
    context: &Context,
    options: &ExecutionOptions,
) -> (graphql::Response, CachePolicy) {
    let scope = ExecutionScope {
        schema,
        document: &prepared.document,
        operation: &prepared.operation,
        variables: &prepared.variables,
        context,
    };
    let root_type = prepared.kind.root_type_name();
    let root = [&prepared.operation.selection_set];
    let groups = collect_fields(
        schema.schema(),
        &prepared.document,
        &prepared.variables,
        root_type,
        &root,
    );

    let mut data = Object::new();
    let mut errors = Vec::new();

    if groups
        .values()
        .flatten()
        .any(|field| is_introspection(field.name.as_str()))
    {
        introspect(schema, prepared, &mut data, &mut errors);
    }

    let mut steps: Vec<RootStep<'_>> = Vec::new();
    for (key, fields) in groups {
        let Some(first) = fields.first() else {
            continue;
        };
        let name = first.name.as_str();
        if name.starts_with("__") {
            continue;
        }
        if schema.binding(root_type, name).is_some() {
            steps.push(RootStep::Delegated((key, fields)));
            continue;
        }
        let Some(source) = schema.root_owner(root_type, name) else {
            continue;
        };
        // mutations keep document order, so only consecutive fields share an operation
        let batch = match prepared.kind {
            OperationKind::Query => steps.iter_mut().find_map(|step| match step {
                RootStep::Forwarded(batch) if batch.source.name() == source.name() => Some(batch),
                _ => None,
            }),
            OperationKind::Mutation => match steps.last_mut() {
                Some(RootStep::Forwarded(batch)) if batch.source.name() == source.name() => {
                    Some(batch)
                }
                _ => None,
            },
        };
        match batch {
            Some(batch) => batch.groups.push((key, fields)),
            None => steps.push(RootStep::Forwarded(Batch {
                source: source.clone(),
                groups: vec![(key, fields)],
            })),
        }
    }

    let root_value = match prepared.kind {
        OperationKind::Query => {
            let fetched = join_all(steps.iter().filter_map(|step| match step {
                RootStep::Forwarded(batch) => Some(fetch(&scope, prepared, batch)),
                RootStep::Delegated(_) => None,
            }))
            .await;
            for (fetched_data, fetch_errors) in fetched {
                data.extend(fetched_data);
                errors.extend(fetch_errors);
            }
            let mut root_value = Value::Object(data);
            delegate::resolve_extensions(&scope, &mut root_value, &mut errors, root_type, &root)
                .await;
            root_value
        }
        OperationKind::Mutation => {
            let mut root_value = Value::Object(data);
            for step in &steps {
                let groups: Vec<&RootGroup<'_>> = match step {
                    RootStep::Forwarded(batch) => {
                        let (fetched_data, fetch_errors) = fetch(&scope, prepared, batch).await;
                        if let Value::Object(data) = &mut root_value {
                            data.extend(fetched_data);
                        }
                        errors.extend(fetch_errors);
                        batch.groups.iter().collect()
                    }
                    RootStep::Delegated(group) => vec![group],
                };
                for (key, fields) in groups {
                    delegate::resolve_root_field(
                        &scope,
                        &mut root_value,
                        &mut errors,
                        root_type,
                        *key,
                        fields,
                    )
                    .await;
                }
            }
            root_value
        }
    };
    let data = match root_value {
        Value::Object(data) => data,
        _ => Object::new(),
    };

    let (data, errors, hints) = Completion::new(&scope, root_type, options.default_max_age, errors)
        .complete_root(&data, &prepared.operation.selection_set);
    let policy = hints.policy();
    let mut response = graphql::Response::builder()
        .data(data)
        .errors(errors)
        .build();
    if options.expose_hints {
        response
            .extensions
            .insert(CACHE_CONTROL_EXTENSION, hints.to_extension());
    }
    (response, policy)
}

/// Answers `__schema` and `__type` from the stitched schema.
fn introspect(
    schema: &MergedSchema,
    prepared: &PreparedOperation,
    data: &mut Object,
    errors: &mut Vec<Error>,
) {
    let result = apollo_compiler::introspection::partial_execute(
        schema.schema(),
        &schema.schema().implementers_map(),
        &prepared.document,
        &prepared.operation,
        &prepared.variables,
    );
    match result {
        Ok(response) => {
            data.extend(response.data.unwrap_or_default());
            errors.extend(response.errors.into_iter().map(Error::from));
        }
        Err(e) => errors.push(
            Error::builder()
                .message(e.message().to_string())
                .extension_code("INTROSPECTION_FAILED")
                .build(),
        ),
    }
}

/// Forwards a batch of root fields to their source.
async fn fetch(
    scope: &ExecutionScope<'_>,
    prepared: &PreparedOperation,
    batch: &Batch<'_>,
) -> (Object, Vec<Error>) {
    let forwarded = Printer::new(
        scope.schema,
        scope.document,
        &scope.operation.variables,
        scope.variables,
    )
    .root_operation(prepared.kind, prepared.name(), &batch.groups);
    let request = graphql::Request::builder()
        .query(forwarded.query)
        .and_operation_name(prepared.name().map(str::to_string))
        .variables(forwarded.variables)
        .build();

    let service = batch.source.name();
    let span = tracing::info_span!("fetch", source = service, fields = batch.groups.len());
    match batch.source.execute(request, scope.context).instrument(span).await {
        Ok(response) => {
            let data = match response.data {
                Some(Value::Object(data)) => data,
                _ => Object::new(),
            };
            let errors = response
                .errors
                .into_iter()
                .map(|mut error| {
                    error
                        .extensions
                        .entry("service")
                        .or_insert_with(|| service.into());
                    error
                })
                .collect();
            (data, errors)
        }
        Err(error) => {
            tracing::warn!(source = service, %error, "fetch failed");
            let errors = batch
                .groups
                .iter()
                .map(|(key, _)| error.to_graphql_error(Some(Path::empty().join(*key))))
                .collect();
            (Object::new(), errors)
        }
    }
}

#[cfg(test)]
mod tests;
