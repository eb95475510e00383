//! Introspection of upstream sources and encoding of the result back to SDL.
//!
//! The query deliberately avoids `isRepeatable` and `specifiedByURL` so that older servers
//! accept it.

use std::collections::HashMap;
use std::fmt::Write;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use apollo_compiler::response::JsonMap;
use apollo_compiler::validation::Valid;
use serde::Deserialize;
use serde::Serialize;

pub(crate) const INTROSPECTION_QUERY: &str = r#"query IntrospectionQuery {
  __schema {
    queryType { name }
    mutationType { name }
    subscriptionType { name }
    types { ...FullType }
    directives {
      name
      description
      locations
      args { ...InputValue }
    }
  }
}

fragment FullType on __Type {
  kind
  name
  description
  fields(includeDeprecated: true) {
    name
    description
    args { ...InputValue }
    type { ...TypeRef }
    isDeprecated
    deprecationReason
  }
  inputFields { ...InputValue }
  interfaces { ...TypeRef }
  enumValues(includeDeprecated: true) {
    name
    description
    isDeprecated
    deprecationReason
  }
  possibleTypes { ...TypeRef }
}

fragment InputValue on __InputValue {
  name
  description
  type { ...TypeRef }
  defaultValue
}

fragment TypeRef on __Type {
  kind
  name
  ofType {
    kind
    name
    ofType {
      kind
      name
      ofType {
        kind
        name
        ofType {
          kind
          name
          ofType {
            kind
            name
            ofType {
              kind
              name
              ofType {
                kind
                name
              }
            }
          }
        }
      }
    }
  }
}
"#;

// Represents GraphQL types we will not be encoding to SDL.
const GRAPHQL_NAMED_TYPES: [&str; 13] = [
    "__Schema",
    "__Type",
    "__TypeKind",
    "__Field",
    "__InputValue",
    "__EnumValue",
    "__DirectiveLocation",
    "__Directive",
    "Boolean",
    "Float",
    "String",
    "Int",
    "ID",
];

// Represents GraphQL directives we will not be encoding to SDL.
const SPECIFIED_DIRECTIVES: [&str; 5] = ["skip", "include", "deprecated", "specifiedBy", "oneOf"];

pub(crate) const ROOT_TYPE_NAMES: [&str; 3] = ["Query", "Mutation", "Subscription"];

/// The `__schema` part of an introspection result.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IntrospectedSchema {
    pub(crate) query_type: NamedRef,
    #[serde(default)]
    pub(crate) mutation_type: Option<NamedRef>,
    #[serde(default)]
    pub(crate) subscription_type: Option<NamedRef>,
    pub(crate) types: Vec<FullType>,
    #[serde(default)]
    pub(crate) directives: Vec<DirectiveDefinition>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub(crate) struct NamedRef {
    pub(crate) name: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
    List,
    NonNull,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FullType {
    pub(crate) kind: TypeKind,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) fields: Option<Vec<FieldDefinition>>,
    #[serde(default)]
    pub(crate) input_fields: Option<Vec<InputValue>>,
    #[serde(default)]
    pub(crate) interfaces: Option<Vec<TypeRef>>,
    #[serde(default)]
    pub(crate) enum_values: Option<Vec<EnumValue>>,
    #[serde(default)]
    pub(crate) possible_types: Option<Vec<TypeRef>>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FieldDefinition {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) args: Vec<InputValue>,
    #[serde(rename = "type")]
    pub(crate) ty: TypeRef,
    #[serde(default)]
    pub(crate) is_deprecated: bool,
    #[serde(default)]
    pub(crate) deprecation_reason: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InputValue {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(rename = "type")]
    pub(crate) ty: TypeRef,
    #[serde(default)]
    pub(crate) default_value: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EnumValue {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) is_deprecated: bool,
    #[serde(default)]
    pub(crate) deprecation_reason: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TypeRef {
    pub(crate) kind: TypeKind,
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(default)]
    pub(crate) of_type: Option<Box<TypeRef>>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DirectiveDefinition {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    pub(crate) locations: Vec<String>,
    #[serde(default)]
    pub(crate) args: Vec<InputValue>,
}

impl TypeRef {
    /// The innermost named type.
    pub(crate) fn named_type(&self) -> Option<&str> {
        match &self.of_type {
            Some(of_type) => of_type.named_type(),
            None => self.name.as_deref(),
        }
    }

    /// Whether a list wrapper appears anywhere in the type.
    pub(crate) fn is_list(&self) -> bool {
        self.kind == TypeKind::List || self.of_type.as_ref().is_some_and(|t| t.is_list())
    }

    fn rename(&mut self, renames: &HashMap<String, String>) {
        if let Some(name) = self.name.as_mut() {
            if let Some(new_name) = renames.get(name.as_str()) {
                *name = new_name.clone();
            }
        }
        if let Some(of_type) = self.of_type.as_mut() {
            of_type.rename(renames);
        }
    }

    fn encode(&self, out: &mut String) {
        match (self.kind, &self.of_type) {
            (TypeKind::NonNull, Some(of_type)) => {
                of_type.encode(out);
                out.push('!');
            }
            (TypeKind::List, Some(of_type)) => {
                out.push('[');
                of_type.encode(out);
                out.push(']');
            }
            _ => out.push_str(self.name.as_deref().unwrap_or_default()),
        }
    }
}

impl FullType {
    /// An object type without description or interfaces.
    pub(crate) fn object(name: &str, fields: impl IntoIterator<Item = FieldDefinition>) -> Self {
        Self {
            kind: TypeKind::Object,
            name: name.to_string(),
            description: None,
            fields: Some(fields.into_iter().collect()),
            input_fields: None,
            interfaces: Some(Vec::new()),
            enum_values: None,
            possible_types: None,
        }
    }

    pub(crate) fn is_built_in(&self) -> bool {
        GRAPHQL_NAMED_TYPES.contains(&self.name.as_str())
    }

    /// Structural comparison ignoring descriptions. The implementations of an interface are
    /// not part of its shape: every source implements a shared interface with its own types.
    pub(crate) fn same_shape(&self, other: &FullType) -> bool {
        self.without_descriptions() == other.without_descriptions()
    }

    fn without_descriptions(&self) -> FullType {
        let mut copy = self.clone();
        copy.description = None;
        if copy.kind == TypeKind::Interface {
            copy.possible_types = None;
        }
        for field in copy.fields.iter_mut().flatten() {
            field.description = None;
            for arg in &mut field.args {
                arg.description = None;
            }
        }
        for input in copy.input_fields.iter_mut().flatten() {
            input.description = None;
        }
        for value in copy.enum_values.iter_mut().flatten() {
            value.description = None;
        }
        copy
    }

    fn rename(&mut self, renames: &HashMap<String, String>) {
        if let Some(new_name) = renames.get(self.name.as_str()) {
            self.name = new_name.clone();
        }
        for field in self.fields.iter_mut().flatten() {
            field.ty.rename(renames);
            for arg in &mut field.args {
                arg.ty.rename(renames);
            }
        }
        for type_ref in self
            .interfaces
            .iter_mut()
            .flatten()
            .chain(self.possible_types.iter_mut().flatten())
        {
            type_ref.rename(renames);
        }
    }
}

impl DirectiveDefinition {
    pub(crate) fn without_description(&self) -> DirectiveDefinition {
        let mut copy = self.clone();
        copy.description = None;
        for arg in &mut copy.args {
            arg.description = None;
        }
        copy
    }
}

impl IntrospectedSchema {
    /// Renames the root operation types to `Query`, `Mutation` and `Subscription`.
    pub(crate) fn canonicalize_roots(&mut self) {
        let mut renames = HashMap::new();
        for (root, canonical) in [
            (Some(&mut self.query_type), "Query"),
            (self.mutation_type.as_mut(), "Mutation"),
            (self.subscription_type.as_mut(), "Subscription"),
        ] {
            if let Some(root) = root {
                if root.name != canonical {
                    renames.insert(root.name.clone(), canonical.to_string());
                    root.name = canonical.to_string();
                }
            }
        }
        if renames.is_empty() {
            return;
        }
        for ty in &mut self.types {
            ty.rename(&renames);
        }
    }

    /// The root type names, in `Query`, `Mutation`, `Subscription` order.
    pub(crate) fn root_type_names(&self) -> Vec<&str> {
        std::iter::once(&self.query_type)
            .chain(self.mutation_type.as_ref())
            .chain(self.subscription_type.as_ref())
            .map(|root| root.name.as_str())
            .collect()
    }

    pub(crate) fn custom_directives(&self) -> impl Iterator<Item = &DirectiveDefinition> {
        self.directives
            .iter()
            .filter(|directive| !SPECIFIED_DIRECTIVES.contains(&directive.name.as_str()))
    }

    /// Encode the schema into an SDL document.
    pub(crate) fn encode(&self) -> String {
        let mut sdl = String::new();
        sdl.push_str("schema {\n");
        let _ = writeln!(sdl, "  query: {}", self.query_type.name);
        if let Some(mutation) = &self.mutation_type {
            let _ = writeln!(sdl, "  mutation: {}", mutation.name);
        }
        if let Some(subscription) = &self.subscription_type {
            let _ = writeln!(sdl, "  subscription: {}", subscription.name);
        }
        sdl.push_str("}\n\n");

        for directive in self.custom_directives() {
            encode_directive(directive, &mut sdl);
        }
        for ty in self.types.iter().filter(|ty| !ty.is_built_in()) {
            encode_full_type(ty, &mut sdl);
        }
        sdl
    }
}

/// Encodes a list of directive definitions and types, used for merged documents.
pub(crate) fn encode_definitions<'a>(
    directives: impl IntoIterator<Item = &'a DirectiveDefinition>,
    types: impl IntoIterator<Item = &'a FullType>,
) -> String {
    let mut sdl = String::new();
    for directive in directives {
        encode_directive(directive, &mut sdl);
    }
    for ty in types {
        encode_full_type(ty, &mut sdl);
    }
    sdl
}

fn encode_description(description: &Option<String>, indent: &str, out: &mut String) {
    if let Some(description) = description {
        // JSON string escaping is a valid GraphQL string literal.
        let literal = serde_json::to_string(description).unwrap_or_default();
        let _ = writeln!(out, "{indent}{literal}");
    }
}

fn encode_deprecated(is_deprecated: bool, reason: &Option<String>, out: &mut String) {
    if !is_deprecated {
        return;
    }
    match reason {
        Some(reason) => {
            let literal = serde_json::to_string(reason).unwrap_or_default();
            let _ = write!(out, " @deprecated(reason: {literal})");
        }
        None => out.push_str(" @deprecated"),
    }
}

fn encode_input_value(value: &InputValue, out: &mut String) {
    out.push_str(&value.name);
    out.push_str(": ");
    value.ty.encode(out);
    if let Some(default_value) = &value.default_value {
        out.push_str(" = ");
        out.push_str(default_value);
    }
}

fn encode_arguments(args: &[InputValue], out: &mut String) {
    if args.is_empty() {
        return;
    }
    out.push('(');
    for (index, arg) in args.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        encode_input_value(arg, out);
    }
    out.push(')');
}

fn encode_directive(directive: &DirectiveDefinition, out: &mut String) {
    encode_description(&directive.description, "", out);
    let _ = write!(out, "directive @{}", directive.name);
    encode_arguments(&directive.args, out);
    let _ = writeln!(out, " on {}\n", directive.locations.join(" | "));
}

fn encode_implements(interfaces: &Option<Vec<TypeRef>>, out: &mut String) {
    let names: Vec<&str> = interfaces
        .iter()
        .flatten()
        .filter_map(|interface| interface.name.as_deref())
        .collect();
    if !names.is_empty() {
        let _ = write!(out, " implements {}", names.join(" & "));
    }
}

fn encode_fields(fields: &[FieldDefinition], out: &mut String) {
    out.push_str(" {\n");
    for field in fields {
        encode_description(&field.description, "  ", out);
        out.push_str("  ");
        out.push_str(&field.name);
        encode_arguments(&field.args, out);
        out.push_str(": ");
        field.ty.encode(out);
        encode_deprecated(field.is_deprecated, &field.deprecation_reason, out);
        out.push('\n');
    }
    out.push_str("}\n\n");
}

fn encode_full_type(ty: &FullType, out: &mut String) {
    encode_description(&ty.description, "", out);
    match ty.kind {
        TypeKind::Object | TypeKind::Interface => {
            let keyword = if ty.kind == TypeKind::Object {
                "type"
            } else {
                "interface"
            };
            let _ = write!(out, "{keyword} {}", ty.name);
            encode_implements(&ty.interfaces, out);
            encode_fields(ty.fields.as_deref().unwrap_or_default(), out);
        }
        TypeKind::InputObject => {
            let _ = writeln!(out, "input {} {{", ty.name);
            for input in ty.input_fields.iter().flatten() {
                encode_description(&input.description, "  ", out);
                out.push_str("  ");
                encode_input_value(input, out);
                out.push('\n');
            }
            out.push_str("}\n\n");
        }
        TypeKind::Scalar => {
            let _ = writeln!(out, "scalar {}\n", ty.name);
        }
        TypeKind::Union => {
            let members: Vec<&str> = ty
                .possible_types
                .iter()
                .flatten()
                .filter_map(|member| member.name.as_deref())
                .collect();
            let _ = writeln!(out, "union {} = {}\n", ty.name, members.join(" | "));
        }
        TypeKind::Enum => {
            let _ = writeln!(out, "enum {} {{", ty.name);
            for value in ty.enum_values.iter().flatten() {
                encode_description(&value.description, "  ", out);
                out.push_str("  ");
                out.push_str(&value.name);
                encode_deprecated(value.is_deprecated, &value.deprecation_reason, out);
                out.push('\n');
            }
            out.push_str("}\n\n");
        }
        TypeKind::List | TypeKind::NonNull => {}
    }
}

/// Runs the introspection query against a local schema.
pub(crate) fn introspect_locally(schema: &Valid<Schema>) -> Result<IntrospectedSchema, String> {
    let document = ExecutableDocument::parse_and_validate(
        schema,
        INTROSPECTION_QUERY,
        "introspection.graphql",
    )
    .map_err(|e| e.errors.to_string())?;
    let operation = document
        .operations
        .get(None)
        .map_err(|_| "the introspection query has no operation".to_string())?;
    let variables =
        apollo_compiler::request::coerce_variable_values(schema, operation, &JsonMap::new())
            .map_err(|e| e.message().to_string())?;
    let response = apollo_compiler::introspection::partial_execute(
        schema,
        &schema.implementers_map(),
        &document,
        operation,
        &variables,
    )
    .map_err(|e| e.message().to_string())?;
    if let Some(error) = response.errors.first() {
        return Err(error.message.clone());
    }
    let schema_value = response
        .data
        .and_then(|mut data| data.remove("__schema"))
        .ok_or_else(|| "introspection returned no `__schema`".to_string())?;
    serde_json_bytes::from_value(schema_value).map_err(|e| e.to_string())
}
