//! The delegation binding table: which source answers an extension field, and how.

use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::error::DelegationError;
use crate::json_ext::Object;
use crate::json_ext::Value;

const PARENT_PLACEHOLDER: &str = "$parent";
const ARGUMENT_PLACEHOLDER: &str = "$arg";

/// Root type of a delegated call.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
}

impl OperationKind {
    pub(crate) fn root_type_name(&self) -> &'static str {
        match self {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
        }
    }

    pub(crate) fn keyword(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
        }
    }
}

type CustomRule = dyn Fn(&Object, &Object) -> Result<Object, String> + Send + Sync;

/// Builds the arguments of the target field from the parent requirements and the arguments
/// of the extension field.
#[derive(Clone)]
pub enum ArgumentRule {
    /// A JSON object where `{"$parent": "<field>"}` and `{"$arg": "<name>"}` are substituted.
    Template(Value),
    /// A pure function of `(requirements, arguments)`.
    Custom(Arc<CustomRule>),
}

impl fmt::Debug for ArgumentRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentRule::Template(template) => f.debug_tuple("Template").field(template).finish(),
            ArgumentRule::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Default for ArgumentRule {
    fn default() -> Self {
        ArgumentRule::Template(Value::Object(Object::new()))
    }
}

/// A placeholder found in a template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Placeholder<'a> {
    Parent(&'a str),
    Argument(&'a str),
}

impl ArgumentRule {
    pub fn template(template: Value) -> Self {
        ArgumentRule::Template(template)
    }

    pub fn custom(
        rule: impl Fn(&Object, &Object) -> Result<Object, String> + Send + Sync + 'static,
    ) -> Self {
        ArgumentRule::Custom(Arc::new(rule))
    }

    pub(crate) fn build(&self, requirements: &Object, arguments: &Object) -> Result<Object, String> {
        match self {
            ArgumentRule::Custom(rule) => rule(requirements, arguments),
            ArgumentRule::Template(Value::Object(template)) => Ok(template
                .iter()
                .filter_map(|(key, value)| {
                    Some((key.clone(), substitute(value, requirements, arguments)?))
                })
                .collect()),
            ArgumentRule::Template(_) => Err("the argument template must be an object".to_string()),
        }
    }

    /// Top level argument names of a template. `None` for custom rules.
    pub(crate) fn argument_names(&self) -> Option<Vec<&str>> {
        match self {
            ArgumentRule::Template(Value::Object(template)) => {
                Some(template.keys().map(|key| key.as_str()).collect())
            }
            ArgumentRule::Template(_) => Some(Vec::new()),
            ArgumentRule::Custom(_) => None,
        }
    }

    pub(crate) fn placeholders(&self) -> Vec<Placeholder<'_>> {
        let mut found = Vec::new();
        if let ArgumentRule::Template(template) = self {
            collect_placeholders(template, &mut found);
        }
        found
    }
}

fn placeholder(value: &Value) -> Option<Placeholder<'_>> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    let (key, name) = object.iter().next()?;
    let name = name.as_str()?;
    match key.as_str() {
        PARENT_PLACEHOLDER => Some(Placeholder::Parent(name)),
        ARGUMENT_PLACEHOLDER => Some(Placeholder::Argument(name)),
        _ => None,
    }
}

fn collect_placeholders<'a>(value: &'a Value, found: &mut Vec<Placeholder<'a>>) {
    if let Some(placeholder) = placeholder(value) {
        found.push(placeholder);
        return;
    }
    match value {
        Value::Object(object) => object
            .values()
            .for_each(|value| collect_placeholders(value, found)),
        Value::Array(values) => values
            .iter()
            .for_each(|value| collect_placeholders(value, found)),
        _ => {}
    }
}

// `None` drops the entry: an extension argument that was not provided is not forwarded.
fn substitute(value: &Value, requirements: &Object, arguments: &Object) -> Option<Value> {
    match placeholder(value) {
        Some(Placeholder::Parent(name)) => {
            return Some(requirements.get(name).cloned().unwrap_or(Value::Null));
        }
        Some(Placeholder::Argument(name)) => return arguments.get(name).cloned(),
        None => {}
    }
    match value {
        Value::Object(object) => Some(Value::Object(
            object
                .iter()
                .filter_map(|(key, value)| {
                    Some((key.clone(), substitute(value, requirements, arguments)?))
                })
                .collect(),
        )),
        Value::Array(values) => Some(Value::Array(
            values
                .iter()
                .map(|value| substitute(value, requirements, arguments).unwrap_or(Value::Null))
                .collect(),
        )),
        other => Some(other.clone()),
    }
}

/// Resolves `type_name.field_name` by calling `target_field` on the root type of `source`.
#[derive(Clone, Debug)]
pub struct DelegationBinding {
    type_name: String,
    field_name: String,
    source: String,
    operation: OperationKind,
    target_field: String,
    requires: Vec<String>,
    arguments: ArgumentRule,
}

impl DelegationBinding {
    pub fn new(
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        source: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            field_name: field_name.into(),
            source: source.into(),
            operation: OperationKind::default(),
            target_field: target_field.into(),
            requires: Vec::new(),
            arguments: ArgumentRule::default(),
        }
    }

    pub fn operation(mut self, operation: OperationKind) -> Self {
        self.operation = operation;
        self
    }

    /// Fields of the parent entity the argument rule reads.
    pub fn requires<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn arguments(mut self, rule: ArgumentRule) -> Self {
        self.arguments = rule;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn operation_kind(&self) -> OperationKind {
        self.operation
    }

    pub fn target_field(&self) -> &str {
        &self.target_field
    }

    pub fn required_fields(&self) -> &[String] {
        &self.requires
    }

    pub fn argument_rule(&self) -> &ArgumentRule {
        &self.arguments
    }

    /// Arguments of the delegated call.
    pub(crate) fn build_arguments(
        &self,
        requirements: &Object,
        arguments: &Object,
    ) -> Result<Object, DelegationError> {
        self.arguments
            .build(requirements, arguments)
            .map_err(|reason| DelegationError::ArgumentConstruction {
                type_name: self.type_name.clone(),
                field_name: self.field_name.clone(),
                reason,
            })
    }

    pub(crate) fn coordinate(&self) -> String {
        format!("{}.{}", self.type_name, self.field_name)
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    fn object(value: Value) -> Object {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn parent_placeholders_are_substituted() {
        let binding = DelegationBinding::new("Post", "comments", "comments", "allComments")
            .requires(["id"])
            .arguments(ArgumentRule::template(
                json!({"filter": {"postId": {"$parent": "id"}}, "first": 10}),
            ));
        let arguments = binding
            .build_arguments(&object(json!({"id": "p1"})), &Object::new())
            .unwrap();
        assert_eq!(
            Value::Object(arguments),
            json!({"filter": {"postId": "p1"}, "first": 10})
        );
    }

    #[test]
    fn missing_extension_arguments_are_dropped() {
        let rule = ArgumentRule::template(json!({"first": {"$arg": "limit"}, "ids": [{"$arg": "id"}]}));
        let arguments = rule.build(&Object::new(), &Object::new()).unwrap();
        assert_eq!(Value::Object(arguments), json!({"ids": [null]}));

        let arguments = rule
            .build(&Object::new(), &object(json!({"limit": 5, "id": "x"})))
            .unwrap();
        assert_eq!(Value::Object(arguments), json!({"first": 5, "ids": ["x"]}));
    }

    #[test]
    fn custom_rules_see_requirements_and_arguments() {
        let binding = DelegationBinding::new("Comment", "post", "posts", "post")
            .requires(["postId"])
            .arguments(ArgumentRule::custom(|requirements, _| {
                let id = requirements
                    .get("postId")
                    .and_then(|id| id.as_str())
                    .ok_or("postId is not a string")?;
                Ok(object(json!({ "id": id.to_uppercase() })))
            }));
        let arguments = binding
            .build_arguments(&object(json!({"postId": "p1"})), &Object::new())
            .unwrap();
        assert_eq!(Value::Object(arguments), json!({"id": "P1"}));

        let error = binding
            .build_arguments(&object(json!({"postId": 1})), &Object::new())
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "cannot build arguments for 'Comment.post': postId is not a string"
        );
    }

    #[test]
    fn placeholders_are_listed() {
        let rule = ArgumentRule::template(
            json!({"filter": {"postId": {"$parent": "id"}, "text": {"$arg": "search"}}}),
        );
        assert_eq!(
            rule.placeholders(),
            vec![Placeholder::Parent("id"), Placeholder::Argument("search")]
        );
        assert_eq!(rule.argument_names(), Some(vec!["filter"]));
        assert_eq!(ArgumentRule::custom(|_, _| Ok(Object::new())).argument_names(), None);
    }

    #[test]
    fn non_object_templates_fail() {
        let error = ArgumentRule::template(json!([1]))
            .build(&Object::new(), &Object::new())
            .unwrap_err();
        assert_eq!(error, "the argument template must be an object");
    }
}
