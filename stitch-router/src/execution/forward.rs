//! Printing of the operations sent to sources.
//!
//! A forwarded selection keeps the client's response keys so upstream data can be merged as
//! is. Extension fields are replaced by the parent fields their binding requires, aliased with
//! [`REQUIRED_PREFIX`], and every composite selection asks for `__typename`.

use std::fmt::Write;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::executable::VariableDefinition;
use apollo_compiler::response::JsonMap;
use apollo_compiler::schema::ExtendedType;

use super::fields::is_included;
use super::fields::variables_in;
use crate::json_ext::Object;
use crate::stitching::DelegationBinding;
use crate::stitching::MergedSchema;
use crate::stitching::OperationKind;

pub(crate) const REQUIRED_PREFIX: &str = "_stitch_required_";
const ARGUMENT_PREFIX: &str = "_stitch_arg_";

/// An operation ready to be sent to a source.
#[derive(Debug)]
pub(crate) struct Forwarded {
    pub(crate) query: String,
    pub(crate) variables: Object,
}

pub(crate) struct Printer<'a> {
    schema: &'a MergedSchema,
    document: &'a ExecutableDocument,
    variable_definitions: &'a [Node<VariableDefinition>],
    variables: &'a JsonMap,
    used_variables: Vec<&'a str>,
    body: String,
}

impl<'a> Printer<'a> {
    pub(crate) fn new(
        schema: &'a MergedSchema,
        document: &'a ExecutableDocument,
        variable_definitions: &'a [Node<VariableDefinition>],
        variables: &'a JsonMap,
    ) -> Self {
        Self {
            schema,
            document,
            variable_definitions,
            variables,
            used_variables: Vec::new(),
            body: String::new(),
        }
    }

    /// Root fields of the client operation owned by one source.
    pub(crate) fn root_operation(
        mut self,
        kind: OperationKind,
        name: Option<&str>,
        groups: &[(&'a str, Vec<&'a Node<Field>>)],
    ) -> Forwarded {
        for (key, fields) in groups {
            self.body.push(' ');
            self.field(key, fields);
        }
        let body = std::mem::take(&mut self.body);
        self.finish(kind, name, Vec::new(), Object::new(), &body)
    }

    /// A call of the binding's target field with `arguments`, selecting what the client asked
    /// of the extension field.
    pub(crate) fn delegation(
        mut self,
        binding: &DelegationBinding,
        arguments: Object,
        fields: &[&'a Node<Field>],
    ) -> Forwarded {
        let schema = self.schema;
        let root = binding.operation_kind().root_type_name();
        let target = binding.target_field();
        let definition = schema.schema().type_field(root, target).ok();

        let mut declarations = Vec::new();
        let mut values = Object::new();
        let mut call_arguments = Vec::new();
        for (name, value) in arguments {
            let argument_type = definition.and_then(|definition| {
                definition
                    .arguments
                    .iter()
                    .find(|argument| argument.name == name.as_str())
                    .map(|argument| argument.ty.to_string())
            });
            let Some(argument_type) = argument_type else {
                tracing::debug!(argument = %name.as_str(), target, "dropping unknown argument");
                continue;
            };
            let variable = format!("{ARGUMENT_PREFIX}{}", name.as_str());
            call_arguments.push(format!("{}: ${variable}", name.as_str()));
            declarations.push(format!("${variable}: {argument_type}"));
            values.insert(variable, value);
        }

        self.body.push(' ');
        self.body.push_str(target);
        if !call_arguments.is_empty() {
            let _ = write!(self.body, "({})", call_arguments.join(", "));
        }
        if definition.is_some_and(|definition| self.is_composite(definition.ty.inner_named_type()))
        {
            self.selection_sets(fields.iter().map(|field| &field.selection_set));
        }
        let body = std::mem::take(&mut self.body);
        self.finish(binding.operation_kind(), None, declarations, values, &body)
    }

    fn finish(
        self,
        kind: OperationKind,
        name: Option<&str>,
        mut declarations: Vec<String>,
        mut values: Object,
        body: &str,
    ) -> Forwarded {
        for variable in &self.used_variables {
            let Some(definition) = self
                .variable_definitions
                .iter()
                .find(|definition| definition.name == *variable)
            else {
                continue;
            };
            declarations.push(format!("${variable}: {}", definition.ty));
            if let Some(value) = self.variables.get(*variable) {
                values.insert(*variable, value.clone());
            }
        }

        let mut query = String::from(kind.keyword());
        if let Some(name) = name {
            query.push(' ');
            query.push_str(name);
        }
        if !declarations.is_empty() {
            let _ = write!(query, "({})", declarations.join(", "));
        }
        let _ = write!(query, " {{{body} }}");
        Forwarded {
            query,
            variables: values,
        }
    }

    fn is_composite(&self, type_name: &str) -> bool {
        matches!(
            self.schema.schema().types.get(type_name),
            Some(ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_))
        )
    }

    fn field(&mut self, key: &str, fields: &[&'a Node<Field>]) {
        let Some(first) = fields.first() else {
            return;
        };
        if key != first.name.as_str() {
            let _ = write!(self.body, "{key}: ");
        }
        self.body.push_str(&first.name);
        if !first.arguments.is_empty() {
            let arguments: Vec<String> = first
                .arguments
                .iter()
                .map(|argument| {
                    variables_in(&argument.value, &mut self.used_variables);
                    format!("{}: {}", argument.name, argument.value)
                })
                .collect();
            let _ = write!(self.body, "({})", arguments.join(", "));
        }
        if self.is_composite(first.definition.ty.inner_named_type()) {
            self.selection_sets(fields.iter().map(|field| &field.selection_set));
        }
    }

    fn selection_sets(&mut self, selection_sets: impl Iterator<Item = &'a SelectionSet>) {
        self.body.push_str(" {");
        for selection_set in selection_sets {
            self.selections(selection_set);
        }
        self.body.push_str(" __typename }");
    }

    fn selections(&mut self, selection_set: &'a SelectionSet) {
        for selection in &selection_set.selections {
            if !is_included(selection.directives(), self.variables) {
                continue;
            }
            match selection {
                Selection::Field(field) => {
                    let binding = self
                        .schema
                        .binding(selection_set.ty.as_str(), field.name.as_str());
                    match binding {
                        Some(binding) => {
                            for required in binding.required_fields() {
                                let _ = write!(self.body, " {REQUIRED_PREFIX}{required}: {required}");
                            }
                        }
                        None => {
                            self.body.push(' ');
                            self.field(field.response_key().as_str(), &[field]);
                        }
                    }
                }
                Selection::FragmentSpread(spread) => {
                    if let Some(fragment) = self.document.fragments.get(&spread.fragment_name) {
                        let _ = write!(self.body, " ... on {} {{", fragment.type_condition());
                        self.selections(&fragment.selection_set);
                        self.body.push_str(" }");
                    }
                }
                Selection::InlineFragment(inline) => {
                    match &inline.type_condition {
                        Some(condition) => {
                            let _ = write!(self.body, " ... on {condition} {{");
                        }
                        None => self.body.push_str(" ... {"),
                    }
                    self.selections(&inline.selection_set);
                    self.body.push_str(" }");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use apollo_compiler::ExecutableDocument;
    use serde_json_bytes::json;

    use super::*;
    use crate::json_ext::Value;
    use crate::stitching::merge;
    use crate::test_harness::EXTENSIONS;
    use crate::test_harness::MockSource;
    use crate::test_harness::canned_bindings;

    async fn canned_schema() -> MergedSchema {
        let posts = Arc::new(MockSource::canned_posts().unwrap());
        let comments = Arc::new(MockSource::canned_comments().unwrap());
        merge(
            vec![
                posts.remote_schema().await.unwrap(),
                comments.remote_schema().await.unwrap(),
            ],
            &[EXTENSIONS],
            canned_bindings(),
        )
        .unwrap()
    }

    fn root_groups<'a>(
        document: &'a ExecutableDocument,
    ) -> Vec<(&'a str, Vec<&'a Node<Field>>)> {
        let operation = document.operations.get(None).unwrap();
        operation
            .selection_set
            .selections
            .iter()
            .filter_map(|selection| match selection {
                Selection::Field(field) => Some((field.response_key().as_str(), vec![field])),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn extension_fields_become_requirements() {
        let schema = canned_schema().await;
        let document = ExecutableDocument::parse_and_validate(
            schema.schema(),
            r#"query Posts($id: ID) {
                first: Post(id: $id) { title comments { text } ...rest }
            }
            fragment rest on Post { createdAt @skip(if: true) text }"#,
            "query.graphql",
        )
        .unwrap();
        let operation = document.operations.get(None).unwrap();
        let variables = json!({"id": "p1"});
        let forwarded = Printer::new(
            &schema,
            &document,
            &operation.variables,
            variables.as_object().unwrap(),
        )
        .root_operation(OperationKind::Query, Some("Posts"), &root_groups(&document));

        assert_eq!(
            forwarded.query,
            "query Posts($id: ID) { first: Post(id: $id) { title _stitch_required_id: id ... on Post { text } __typename } }"
        );
        assert_eq!(Value::Object(forwarded.variables), json!({"id": "p1"}));
    }

    #[tokio::test]
    async fn delegated_calls_pass_arguments_as_variables() {
        let schema = canned_schema().await;
        let document = ExecutableDocument::parse_and_validate(
            schema.schema(),
            "{ Comment(id: \"c1\") { post { title comments { id } } } }",
            "query.graphql",
        )
        .unwrap();
        let operation = document.operations.get(None).unwrap();
        let comment = match &operation.selection_set.selections[0] {
            Selection::Field(field) => field,
            _ => unreachable!(),
        };
        let post = match &comment.selection_set.selections[0] {
            Selection::Field(field) => field,
            _ => unreachable!(),
        };
        let binding = schema.binding("Comment", "post").unwrap();
        let variables = JsonMap::new();
        let forwarded = Printer::new(&schema, &document, &operation.variables, &variables)
            .delegation(
                binding,
                json!({"id": "p1"}).as_object().unwrap().clone(),
                &[post],
            );

        assert_eq!(
            forwarded.query,
            "query($_stitch_arg_id: ID) { Post(id: $_stitch_arg_id) { title _stitch_required_id: id __typename } }"
        );
        assert_eq!(
            Value::Object(forwarded.variables),
            json!({"_stitch_arg_id": "p1"})
        );
    }
}
