//! Type extensions: the GraphQL text that adds delegated fields to the stitched schema.

use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::ast::Definition;

use crate::error::CompositionError;

/// A field added to an existing object type.
#[derive(Clone, Debug)]
pub(crate) struct ExtensionField {
    pub(crate) type_name: String,
    pub(crate) definition: Node<ast::FieldDefinition>,
}

impl ExtensionField {
    pub(crate) fn field_name(&self) -> &str {
        self.definition.name.as_str()
    }
}

/// Parsed extension documents.
#[derive(Clone, Debug, Default)]
pub(crate) struct Extensions {
    pub(crate) documents: Vec<String>,
    pub(crate) fields: Vec<ExtensionField>,
}

impl Extensions {
    pub(crate) fn parse<'a>(
        texts: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, CompositionError> {
        let mut extensions = Extensions::default();
        for (index, text) in texts.into_iter().enumerate() {
            let document = ast::Document::parse(text, format!("extensions_{index}.graphql"))
                .map_err(|e| CompositionError::InvalidExtension {
                    reason: e.errors.to_string(),
                })?;
            for definition in &document.definitions {
                extensions.add_definition(definition)?;
            }
            extensions.documents.push(text.to_string());
        }
        Ok(extensions)
    }

    fn add_definition(&mut self, definition: &Definition) -> Result<(), CompositionError> {
        let invalid = |reason: String| CompositionError::InvalidExtension { reason };
        match definition {
            Definition::ObjectTypeExtension(extension) => {
                self.fields
                    .extend(extension.fields.iter().map(|field| ExtensionField {
                        type_name: extension.name.to_string(),
                        definition: field.clone(),
                    }));
                Ok(())
            }
            Definition::InterfaceTypeExtension(extension) if !extension.fields.is_empty() => {
                Err(invalid(format!(
                    "fields cannot be added to interface '{}', extend its implementations instead",
                    extension.name
                )))
            }
            Definition::OperationDefinition(_) | Definition::FragmentDefinition(_) => Err(
                invalid("operations and fragments are not allowed in type extensions".to_string()),
            ),
            Definition::SchemaDefinition(_) | Definition::SchemaExtension(_) => Err(invalid(
                "the schema definition is generated and cannot be extended".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub(crate) fn field(&self, type_name: &str, field_name: &str) -> Option<&ExtensionField> {
        self.fields
            .iter()
            .find(|field| field.type_name == type_name && field.field_name() == field_name)
    }

    pub(crate) fn contains(&self, type_name: &str, field_name: &str) -> bool {
        self.field(type_name, field_name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_extensions_introduce_fields() {
        let extensions = Extensions::parse([
            "extend type Post { comments: [Comment] @cacheControl(maxAge: 240) }",
            "extend type Comment { post: Post }\ntype Unused { id: ID }",
        ])
        .unwrap();
        assert_eq!(extensions.documents.len(), 2);
        let fields: Vec<_> = extensions
            .fields
            .iter()
            .map(|field| format!("{}.{}", field.type_name, field.field_name()))
            .collect();
        assert_eq!(fields, ["Post.comments", "Comment.post"]);
        assert!(extensions.contains("Post", "comments"));
        assert!(!extensions.contains("Post", "title"));
    }

    #[test]
    fn syntax_errors_are_reported() {
        let error = Extensions::parse(["extend type Post { comments: [Comment }"]).unwrap_err();
        assert!(matches!(error, CompositionError::InvalidExtension { .. }));
    }

    #[test]
    fn interface_fields_are_rejected() {
        let error = Extensions::parse(["extend interface Node { comments: [Comment] }"]).unwrap_err();
        assert_eq!(
            error.to_string(),
            "invalid type extension: fields cannot be added to interface 'Node', extend its implementations instead"
        );
    }

    #[test]
    fn operations_are_rejected() {
        assert!(Extensions::parse(["query { posts { id } }"]).is_err());
    }
}
