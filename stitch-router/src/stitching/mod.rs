//! Merging of source schemas, type extensions and delegation bindings into one stitched schema.
//!
//! Root types of every source are merged field-wise, other types must be identical when more
//! than one source defines them. Fields introduced by type extensions are resolved through
//! their [`DelegationBinding`], which is validated here so that no request is ever served with
//! an unresolvable field.

mod binding;
mod extension;

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
pub use binding::ArgumentRule;
pub use binding::DelegationBinding;
pub use binding::OperationKind;
use binding::Placeholder;
use extension::Extensions;
use indexmap::IndexMap;
use itertools::Itertools;

use crate::cache::CACHE_CONTROL_DIRECTIVE;
use crate::cache::CACHE_CONTROL_SCOPE;
use crate::cache::CACHE_CONTROL_SDL;
use crate::cache::CacheHint;
use crate::error::CompositionError;
use crate::remote::DirectiveDefinition;
use crate::remote::FieldDefinition;
use crate::remote::FullType;
use crate::remote::ROOT_TYPE_NAMES;
use crate::remote::RemoteSchema;
use crate::remote::encode_definitions;

pub(crate) const EXTENSIONS_SOURCE: &str = "extensions";

type FieldTable<T> = HashMap<String, HashMap<String, T>>;

/// The stitched schema with everything needed to execute operations against it.
#[derive(Debug)]
pub struct MergedSchema {
    schema: Valid<Schema>,
    sdl: String,
    sources: IndexMap<String, Arc<RemoteSchema>>,
    root_owners: FieldTable<String>,
    bindings: FieldTable<DelegationBinding>,
    field_hints: FieldTable<CacheHint>,
    type_hints: HashMap<String, CacheHint>,
}

/// Merges source schemas, type extension documents and delegation bindings.
///
/// Every field introduced by a type extension must have exactly one binding.
pub fn merge(
    sources: Vec<RemoteSchema>,
    extensions: &[&str],
    bindings: Vec<DelegationBinding>,
) -> Result<MergedSchema, CompositionError> {
    let mut by_name: IndexMap<String, Arc<RemoteSchema>> = IndexMap::new();
    for source in sources {
        if by_name.contains_key(source.name()) {
            return Err(CompositionError::DuplicateSource {
                name: source.name().to_string(),
            });
        }
        by_name.insert(source.name().to_string(), Arc::new(source));
    }

    let extensions = Extensions::parse(extensions.iter().copied())?;
    let (sdl, root_owners) = compose_sources(&by_name, &extensions)?;

    let mut builder = Schema::builder().parse(&sdl, "stitched.graphql");
    for (index, document) in extensions.documents.iter().enumerate() {
        builder = builder.parse(document, format!("extensions_{index}.graphql"));
    }
    let schema = builder
        .build()
        .and_then(|schema| schema.validate())
        .map_err(|e| CompositionError::InvalidSchema {
            reason: e.errors.to_string(),
        })?;

    let bindings = bind_extensions(bindings, &extensions)?;
    for binding in bindings.values().flat_map(HashMap::values) {
        validate_binding(&schema, &by_name, &root_owners, &extensions, binding)?;
    }

    let (field_hints, type_hints) = collect_cache_hints(&schema);
    let sdl = schema.to_string();

    Ok(MergedSchema {
        schema,
        sdl,
        sources: by_name,
        root_owners,
        bindings,
        field_hints,
        type_hints,
    })
}

/// Prints the merged source types. Extension documents are parsed on top of the result.
fn compose_sources(
    sources: &IndexMap<String, Arc<RemoteSchema>>,
    extensions: &Extensions,
) -> Result<(String, FieldTable<String>), CompositionError> {
    let mut root_fields: IndexMap<&str, IndexMap<&str, (&FieldDefinition, &str)>> =
        IndexMap::new();
    let mut types: IndexMap<&str, (&FullType, Vec<&str>)> = IndexMap::new();
    let mut directives: IndexMap<&str, (&DirectiveDefinition, Vec<&str>)> =
        IndexMap::new();

    for (source_name, source) in sources {
        let introspection = source.introspection();
        let source_roots = introspection.root_type_names();
        for ty in introspection.types.iter().filter(|ty| !ty.is_built_in()) {
            if source_roots.contains(&ty.name.as_str()) {
                let fields = root_fields.entry(ty.name.as_str()).or_default();
                for field in ty.fields.iter().flatten() {
                    if let Some((_, first)) = fields.get(field.name.as_str()) {
                        return Err(CompositionError::RootFieldConflict {
                            type_name: ty.name.clone(),
                            field_name: field.name.clone(),
                            first: first.to_string(),
                            second: source_name.clone(),
                        });
                    }
                    fields.insert(field.name.as_str(), (field, source_name.as_str()));
                }
                continue;
            }
            if ty.name == CACHE_CONTROL_SCOPE {
                continue;
            }
            match types.get_mut(ty.name.as_str()) {
                Some((existing, owners)) => {
                    if !existing.same_shape(ty) {
                        return Err(CompositionError::SchemaConflict {
                            type_name: ty.name.clone(),
                            sources: owners.iter().chain([&source_name.as_str()]).join(", "),
                        });
                    }
                    owners.push(source_name.as_str());
                }
                None => {
                    types.insert(ty.name.as_str(), (ty, vec![source_name.as_str()]));
                }
            }
        }

        for directive in introspection.custom_directives() {
            if directive.name == CACHE_CONTROL_DIRECTIVE {
                continue;
            }
            match directives.get_mut(directive.name.as_str()) {
                Some((existing, owners)) => {
                    if existing.without_description() != directive.without_description() {
                        return Err(CompositionError::SchemaConflict {
                            type_name: format!("@{}", directive.name),
                            sources: owners.iter().chain([&source_name.as_str()]).join(", "),
                        });
                    }
                    owners.push(source_name.as_str());
                }
                None => {
                    directives.insert(directive.name.as_str(), (directive, vec![source_name.as_str()]));
                }
            }
        }
    }

    // Extension fields cannot shadow fields of the sources.
    for field in &extensions.fields {
        let owner = match root_fields.get(field.type_name.as_str()) {
            Some(fields) => fields.get(field.field_name()).map(|(_, owner)| vec![*owner]),
            None => types.get(field.type_name.as_str()).and_then(|(ty, owners)| {
                ty.fields
                    .iter()
                    .flatten()
                    .any(|native| native.name == field.field_name())
                    .then(|| owners.clone())
            }),
        };
        if let Some(owners) = owner {
            return Err(CompositionError::SchemaConflict {
                type_name: format!("{}.{}", field.type_name, field.field_name()),
                sources: owners.iter().chain([&EXTENSIONS_SOURCE]).join(", "),
            });
        }
    }

    let mut sdl = String::from("schema {\n");
    for root in ROOT_TYPE_NAMES {
        if root_fields.get(root).is_some_and(|fields| !fields.is_empty()) {
            let _ = writeln!(sdl, "  {}: {root}", root.to_ascii_lowercase());
        }
    }
    sdl.push_str("}\n\n");
    sdl.push_str(CACHE_CONTROL_SDL);

    let root_types: Vec<FullType> = root_fields
        .iter()
        .filter(|(_, fields)| !fields.is_empty())
        .map(|(name, fields)| FullType::object(name, fields.values().map(|(field, _)| (*field).clone())))
        .collect();
    sdl.push_str(&encode_definitions(
        directives.values().map(|(directive, _)| *directive),
        root_types.iter().chain(types.values().map(|(ty, _)| *ty)),
    ));

    let root_owners = root_fields
        .iter()
        .map(|(root, fields)| {
            (
                root.to_string(),
                fields
                    .iter()
                    .map(|(field, (_, owner))| (field.to_string(), owner.to_string()))
                    .collect(),
            )
        })
        .collect();

    Ok((sdl, root_owners))
}

fn bind_extensions(
    bindings: Vec<DelegationBinding>,
    extensions: &Extensions,
) -> Result<FieldTable<DelegationBinding>, CompositionError> {
    let mut table: FieldTable<DelegationBinding> = HashMap::new();
    for binding in bindings {
        let type_name = binding.type_name().to_string();
        let field_name = binding.field_name().to_string();
        if !extensions.contains(&type_name, &field_name) {
            return Err(CompositionError::OrphanBinding {
                type_name,
                field_name,
            });
        }
        let fields = table.entry(type_name.clone()).or_default();
        if fields.contains_key(&field_name) {
            return Err(CompositionError::DuplicateBinding {
                type_name,
                field_name,
            });
        }
        fields.insert(field_name, binding);
    }

    for field in &extensions.fields {
        let bound = table
            .get(&field.type_name)
            .is_some_and(|fields| fields.contains_key(field.field_name()));
        if !bound {
            return Err(CompositionError::UnboundField {
                type_name: field.type_name.clone(),
                field_name: field.field_name().to_string(),
            });
        }
    }
    Ok(table)
}

fn validate_binding(
    schema: &Valid<Schema>,
    sources: &IndexMap<String, Arc<RemoteSchema>>,
    root_owners: &FieldTable<String>,
    extensions: &Extensions,
    binding: &DelegationBinding,
) -> Result<(), CompositionError> {
    let invalid = |reason: String| CompositionError::InvalidBinding {
        type_name: binding.type_name().to_string(),
        field_name: binding.field_name().to_string(),
        reason,
    };

    if !sources.contains_key(binding.source()) {
        return Err(invalid(format!("unknown source '{}'", binding.source())));
    }

    let root = binding.operation_kind().root_type_name();
    let owner = root_owners
        .get(root)
        .and_then(|fields| fields.get(binding.target_field()));
    if owner.map(String::as_str) != Some(binding.source()) {
        return Err(invalid(format!(
            "source '{}' has no {} field '{}'",
            binding.source(),
            binding.operation_kind().keyword(),
            binding.target_field()
        )));
    }
    let target = schema
        .type_field(root, binding.target_field())
        .map_err(|_| invalid(format!("'{root}.{}' is not defined", binding.target_field())))?;
    let field = schema
        .type_field(binding.type_name(), binding.field_name())
        .map_err(|_| invalid(format!("'{}' is not defined", binding.coordinate())))?;

    if target.ty.inner_named_type() != field.ty.inner_named_type()
        || target.ty.is_list() != field.ty.is_list()
    {
        return Err(invalid(format!(
            "the field returns '{}' but '{}' returns '{}'",
            field.ty,
            binding.target_field(),
            target.ty
        )));
    }

    if ROOT_TYPE_NAMES.contains(&binding.type_name()) && !binding.required_fields().is_empty() {
        return Err(invalid(
            "root fields have no parent entity to require fields from".to_string(),
        ));
    }
    for required in binding.required_fields() {
        let native = schema
            .type_field(binding.type_name(), required)
            .ok()
            .filter(|_| !extensions.contains(binding.type_name(), required));
        let Some(native) = native else {
            return Err(invalid(format!(
                "required field '{required}' is not a field of '{}' provided by a source",
                binding.type_name()
            )));
        };
        let is_leaf = matches!(
            schema.types.get(native.ty.inner_named_type()),
            Some(ExtendedType::Scalar(_) | ExtendedType::Enum(_))
        );
        if !is_leaf || !native.arguments.is_empty() {
            return Err(invalid(format!(
                "required field '{required}' must be a scalar or enum field without arguments"
            )));
        }
    }

    let rule = binding.argument_rule();
    if let Some(names) = rule.argument_names() {
        for name in &names {
            if !target.arguments.iter().any(|arg| arg.name.as_str() == *name) {
                return Err(invalid(format!(
                    "'{}' has no argument '{name}'",
                    binding.target_field()
                )));
            }
        }
        for argument in &target.arguments {
            let required = argument.ty.is_non_null() && argument.default_value.is_none();
            if required && !names.contains(&argument.name.as_str()) {
                return Err(invalid(format!(
                    "required argument '{}' of '{}' is not supplied",
                    argument.name,
                    binding.target_field()
                )));
            }
        }
    }
    for placeholder in rule.placeholders() {
        match placeholder {
            Placeholder::Parent(name) => {
                if !binding.required_fields().iter().any(|required| required == name) {
                    return Err(invalid(format!(
                        "'$parent: {name}' is used but '{name}' is not listed in `requires`"
                    )));
                }
            }
            Placeholder::Argument(name) => {
                if !field.arguments.iter().any(|arg| arg.name.as_str() == name) {
                    return Err(invalid(format!(
                        "'$arg: {name}' is used but '{}' has no argument '{name}'",
                        binding.coordinate()
                    )));
                }
            }
        }
    }
    Ok(())
}

fn collect_cache_hints(schema: &Schema) -> (FieldTable<CacheHint>, HashMap<String, CacheHint>) {
    let mut field_hints: FieldTable<CacheHint> = HashMap::new();
    let mut type_hints = HashMap::new();
    for (type_name, ty) in &schema.types {
        let (directives, fields) = match ty {
            ExtendedType::Object(object) => (&object.directives, Some(&object.fields)),
            ExtendedType::Interface(interface) => (&interface.directives, Some(&interface.fields)),
            ExtendedType::Union(union) => (&union.directives, None),
            _ => continue,
        };
        if let Some(directive) = directives.get(CACHE_CONTROL_DIRECTIVE) {
            type_hints.insert(type_name.to_string(), CacheHint::from_directive(directive));
        }
        for (field_name, field) in fields.into_iter().flatten() {
            if let Some(directive) = field.directives.get(CACHE_CONTROL_DIRECTIVE) {
                field_hints
                    .entry(type_name.to_string())
                    .or_default()
                    .insert(field_name.to_string(), CacheHint::from_directive(directive));
            }
        }
    }
    (field_hints, type_hints)
}

impl MergedSchema {
    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    /// The stitched schema as SDL.
    pub fn sdl(&self) -> &str {
        &self.sdl
    }

    pub fn sources(&self) -> impl Iterator<Item = &Arc<RemoteSchema>> {
        self.sources.values()
    }

    pub fn source(&self, name: &str) -> Option<&Arc<RemoteSchema>> {
        self.sources.get(name)
    }

    /// The source exporting a root field.
    pub(crate) fn root_owner(&self, root: &str, field: &str) -> Option<&Arc<RemoteSchema>> {
        let owner = self.root_owners.get(root)?.get(field)?;
        self.sources.get(owner)
    }

    pub fn binding(&self, type_name: &str, field_name: &str) -> Option<&DelegationBinding> {
        self.bindings.get(type_name)?.get(field_name)
    }

    pub fn bindings(&self) -> impl Iterator<Item = &DelegationBinding> {
        self.bindings.values().flat_map(HashMap::values)
    }

    pub fn field_hint(&self, type_name: &str, field_name: &str) -> Option<&CacheHint> {
        self.field_hints.get(type_name)?.get(field_name)
    }

    pub fn type_hint(&self, type_name: &str) -> Option<&CacheHint> {
        self.type_hints.get(type_name)
    }
}
