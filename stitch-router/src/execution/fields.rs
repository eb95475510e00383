use std::collections::HashSet;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::executable::DirectiveList;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::response::JsonMap;
use indexmap::IndexMap;

use crate::json_ext::Object;
use crate::json_ext::Value;

/// Fields of one selection, grouped by response key in document order.
pub(crate) type FieldGroups<'a> = IndexMap<&'a str, Vec<&'a Node<Field>>>;

/// <https://spec.graphql.org/October2021/#CollectFields()>
///
/// Merges the fields of `selection_sets` that apply to the concrete `object_type`.
pub(crate) fn collect_fields<'a>(
    schema: &Schema,
    document: &'a ExecutableDocument,
    variables: &JsonMap,
    object_type: &str,
    selection_sets: &[&'a SelectionSet],
) -> FieldGroups<'a> {
    let mut grouped = FieldGroups::new();
    let mut visited_fragments = HashSet::new();
    for selection_set in selection_sets {
        collect_fields_inner(
            schema,
            document,
            variables,
            object_type,
            selection_set,
            &mut visited_fragments,
            &mut grouped,
        );
    }
    grouped
}

fn collect_fields_inner<'a>(
    schema: &Schema,
    document: &'a ExecutableDocument,
    variables: &JsonMap,
    object_type: &str,
    selection_set: &'a SelectionSet,
    visited_fragments: &mut HashSet<&'a str>,
    grouped: &mut FieldGroups<'a>,
) {
    for selection in &selection_set.selections {
        if !is_included(selection.directives(), variables) {
            continue;
        }
        match selection {
            Selection::Field(field) => grouped
                .entry(field.response_key().as_str())
                .or_default()
                .push(field),
            Selection::FragmentSpread(spread) => {
                let name = spread.fragment_name.as_str();
                if !visited_fragments.insert(name) {
                    continue;
                }
                let Some(fragment) = document.fragments.get(name) else {
                    continue;
                };
                if !type_applies(schema, fragment.type_condition(), object_type) {
                    continue;
                }
                collect_fields_inner(
                    schema,
                    document,
                    variables,
                    object_type,
                    &fragment.selection_set,
                    visited_fragments,
                    grouped,
                );
            }
            Selection::InlineFragment(inline) => {
                if let Some(condition) = &inline.type_condition {
                    if !type_applies(schema, condition, object_type) {
                        continue;
                    }
                }
                collect_fields_inner(
                    schema,
                    document,
                    variables,
                    object_type,
                    &inline.selection_set,
                    visited_fragments,
                    grouped,
                );
            }
        }
    }
}

fn type_applies(schema: &Schema, condition: &str, object_type: &str) -> bool {
    condition == object_type || schema.is_subtype(condition, object_type)
}

/// Evaluates `@skip` and `@include`.
pub(crate) fn is_included(directives: &DirectiveList, variables: &JsonMap) -> bool {
    let condition = |name: &str| {
        directives
            .get(name)
            .and_then(|directive| directive.specified_argument_by_name("if"))
            .and_then(|value| match &**value {
                ast::Value::Boolean(condition) => Some(*condition),
                ast::Value::Variable(variable) => variables
                    .get(variable.as_str())
                    .and_then(|value| value.as_bool()),
                _ => None,
            })
    };
    condition("skip") != Some(true) && condition("include") != Some(false)
}

/// Arguments of a field as JSON, with variables substituted and defaults applied.
pub(crate) fn argument_values(field: &Field, variables: &JsonMap) -> Object {
    let mut values = Object::new();
    for definition in &field.definition.arguments {
        let provided = field
            .arguments
            .iter()
            .find(|argument| argument.name == definition.name)
            .map(|argument| &argument.value);
        let value = match provided {
            Some(ast_value) => {
                if let ast::Value::Variable(variable) = &**ast_value {
                    match variables.get(variable.as_str()) {
                        Some(value) => value.clone(),
                        None => continue,
                    }
                } else {
                    to_json(ast_value, variables)
                }
            }
            None => match &definition.default_value {
                Some(default_value) => to_json(default_value, variables),
                None => continue,
            },
        };
        values.insert(definition.name.as_str(), value);
    }
    values
}

/// Converts a GraphQL input value to JSON.
pub(crate) fn to_json(value: &ast::Value, variables: &JsonMap) -> Value {
    match value {
        ast::Value::Null => Value::Null,
        ast::Value::Enum(name) => name.as_str().into(),
        ast::Value::Variable(name) => variables
            .get(name.as_str())
            .cloned()
            .unwrap_or(Value::Null),
        ast::Value::String(string) => string.as_str().into(),
        ast::Value::Boolean(boolean) => (*boolean).into(),
        ast::Value::Int(int) => match int.as_str().parse::<i64>() {
            Ok(int) => int.into(),
            Err(_) => float(int.try_to_f64().ok()),
        },
        ast::Value::Float(value) => float(value.try_to_f64().ok()),
        ast::Value::List(items) => Value::Array(
            items
                .iter()
                .map(|item| to_json(item, variables))
                .collect(),
        ),
        ast::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, value)| (name.as_str().into(), to_json(value, variables)))
                .collect(),
        ),
    }
}

fn float(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Names of the variables a value refers to.
pub(crate) fn variables_in<'a>(value: &'a ast::Value, found: &mut Vec<&'a str>) {
    match value {
        ast::Value::Variable(name) => {
            if !found.contains(&name.as_str()) {
                found.push(name.as_str());
            }
        }
        ast::Value::List(items) => {
            for item in items {
                variables_in(item, found);
            }
        }
        ast::Value::Object(fields) => {
            for (_, value) in fields {
                variables_in(value, found);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    const SCHEMA: &str = r#"
        type Query { post(id: ID!, first: Int = 10, order: Order): Post node: Node }
        interface Node { id: ID! }
        type Post implements Node { id: ID! title: String body: String }
        type Comment implements Node { id: ID! text: String }
        enum Order { ASC DESC }
    "#;

    fn keys(groups: &FieldGroups<'_>) -> Vec<String> {
        groups.keys().map(|key| key.to_string()).collect()
    }

    #[test]
    fn fragments_and_directives() {
        let schema = Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap();
        let document = ExecutableDocument::parse_and_validate(
            &schema,
            r#"query($withBody: Boolean!) {
                node {
                    id
                    ... on Post { title body @include(if: $withBody) }
                    ... on Comment { text }
                    ...more
                    other: id @skip(if: true)
                }
            }
            fragment more on Post { title }"#,
            "query.graphql",
        )
        .unwrap();
        let operation = document.operations.get(None).unwrap();
        let node = match &operation.selection_set.selections[0] {
            Selection::Field(field) => field,
            _ => unreachable!(),
        };
        let variables = json!({"withBody": false});
        let variables = variables.as_object().unwrap();

        let post = collect_fields(&schema, &document, variables, "Post", &[&node.selection_set]);
        assert_eq!(keys(&post), ["id", "title"]);
        assert_eq!(post["title"].len(), 2);

        let comment =
            collect_fields(&schema, &document, variables, "Comment", &[&node.selection_set]);
        assert_eq!(keys(&comment), ["id", "text"]);
    }

    #[test]
    fn arguments_are_coerced_to_json() {
        let schema = Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap();
        let document = ExecutableDocument::parse_and_validate(
            &schema,
            r#"query($id: ID!) { post(id: $id, order: DESC) { id } }"#,
            "query.graphql",
        )
        .unwrap();
        let operation = document.operations.get(None).unwrap();
        let post = match &operation.selection_set.selections[0] {
            Selection::Field(field) => field,
            _ => unreachable!(),
        };
        let variables = json!({"id": "p1"});
        assert_eq!(
            Value::Object(argument_values(post, variables.as_object().unwrap())),
            json!({"id": "p1", "first": 10, "order": "DESC"})
        );

        let mut found = Vec::new();
        for argument in &post.arguments {
            variables_in(&argument.value, &mut found);
        }
        assert_eq!(found, ["id"]);
    }
}
