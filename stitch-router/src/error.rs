//! Router errors.
use displaydoc::Display;
use serde::Serialize;
use thiserror::Error;

pub use crate::configuration::ConfigurationError;
pub(crate) use crate::graphql::Error;
use crate::graphql::ErrorExtension;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// Error types for upstream resolution.
///
/// Note that these are not actually returned to the client, but are instead converted to JSON for
/// [`struct@Error`].
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(untagged)]
#[ignore_extra_doc_attributes]
#[non_exhaustive]
pub enum FetchError {
    /// request was malformed: {reason}
    MalformedRequest {
        /// The reason the serialization failed.
        reason: String,
    },

    /// service '{service}' response was malformed: {reason}
    SubrequestMalformedResponse {
        /// The service that responded with the malformed response.
        service: String,

        /// The reason the serialization failed.
        reason: String,
    },

    /// HTTP fetch failed from '{service}': {reason}
    ///
    /// note that this relates to a transport error and not a GraphQL error
    SubrequestHttpError {
        /// The HTTP status sent back by the source, if it answered at all.
        status_code: Option<u16>,

        /// The service failed.
        service: String,

        /// The reason the fetch failed.
        reason: String,
    },
}

impl FetchError {
    /// Convert the fetch error to a GraphQL error.
    pub(crate) fn to_graphql_error(&self, path: Option<Path>) -> Error {
        let mut value: Value = serde_json_bytes::to_value(self).unwrap_or_default();
        if let Some(extensions) = value.as_object_mut() {
            extensions
                .entry("code")
                .or_insert_with(|| self.extension_code().into());
            match self {
                FetchError::SubrequestHttpError {
                    service,
                    status_code,
                    ..
                } => {
                    extensions
                        .entry("service")
                        .or_insert_with(|| service.clone().into());
                    extensions.remove("status_code");
                    if let Some(status_code) = status_code {
                        extensions
                            .insert("http", serde_json_bytes::json!({ "status": status_code }));
                    }
                }
                FetchError::SubrequestMalformedResponse { service, .. } => {
                    extensions
                        .entry("service")
                        .or_insert_with(|| service.clone().into());
                }
                FetchError::MalformedRequest { .. } => {}
            }
            extensions.remove("reason");
        }

        Error::builder()
            .message(self.to_string())
            .and_path(path)
            .extensions(value.as_object().cloned().unwrap_or_default())
            .build()
    }
}

impl ErrorExtension for FetchError {
    fn extension_code(&self) -> String {
        match self {
            FetchError::MalformedRequest { .. } => "MALFORMED_REQUEST",
            FetchError::SubrequestMalformedResponse { .. } => "SUBREQUEST_MALFORMED_RESPONSE",
            FetchError::SubrequestHttpError { .. } => "SUBREQUEST_HTTP_ERROR",
        }
        .to_string()
    }
}

/// Errors raised while resolving a delegated field, before any upstream call is made.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum DelegationError {
    /// cannot resolve '{type_name}.{field_name}': the parent entity has no '{attribute}' attribute
    MissingDependency {
        /// The extended type.
        type_name: String,
        /// The delegated field.
        field_name: String,
        /// The required attribute that was not fetched.
        attribute: String,
    },

    /// cannot build arguments for '{type_name}.{field_name}': {reason}
    ArgumentConstruction {
        /// The extended type.
        type_name: String,
        /// The delegated field.
        field_name: String,
        /// Why the argument rule failed.
        reason: String,
    },
}

impl DelegationError {
    pub(crate) fn to_graphql_error(&self, path: Path) -> Error {
        Error::builder()
            .message(self.to_string())
            .path(path)
            .extension_code(self.extension_code())
            .build()
    }
}

impl ErrorExtension for DelegationError {
    fn extension_code(&self) -> String {
        match self {
            DelegationError::MissingDependency { .. } => "MISSING_DEPENDENCY",
            DelegationError::ArgumentConstruction { .. } => "DELEGATION_ARGUMENTS",
        }
        .to_string()
    }
}

/// Errors raised while discovering the schema of an upstream source.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum SchemaDiscoveryError {
    /// introspection of '{service}' failed: {reason}
    Fetch {
        /// The source that was introspected.
        service: String,
        /// The transport or HTTP failure.
        reason: String,
    },

    /// '{service}' returned an invalid introspection result: {reason}
    MalformedIntrospection {
        /// The source that was introspected.
        service: String,
        /// What was wrong with the result.
        reason: String,
    },

    /// schema of '{service}' is invalid: {reason}
    InvalidSchema {
        /// The source that was introspected.
        service: String,
        /// The validation diagnostics.
        reason: String,
    },
}

/// Errors raised while merging source schemas, type extensions and delegation bindings.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompositionError {
    /// source '{name}' is declared more than once
    DuplicateSource {
        /// The source name.
        name: String,
    },

    /// type '{type_name}' is defined differently by sources {sources}
    SchemaConflict {
        /// The colliding type (or directive, prefixed with `@`).
        type_name: String,
        /// The sources defining it, comma separated.
        sources: String,
    },

    /// field '{type_name}.{field_name}' is provided by both '{first}' and '{second}'
    RootFieldConflict {
        /// The root type.
        type_name: String,
        /// The colliding field.
        field_name: String,
        /// The first source exporting the field.
        first: String,
        /// The second source exporting the field.
        second: String,
    },

    /// field '{type_name}.{field_name}' introduced by a type extension has no delegation binding
    UnboundField {
        /// The extended type.
        type_name: String,
        /// The extension field.
        field_name: String,
    },

    /// field '{type_name}.{field_name}' has more than one delegation binding
    DuplicateBinding {
        /// The extended type.
        type_name: String,
        /// The extension field.
        field_name: String,
    },

    /// delegation binding for '{type_name}.{field_name}' does not match any type extension field
    OrphanBinding {
        /// The type named by the binding.
        type_name: String,
        /// The field named by the binding.
        field_name: String,
    },

    /// invalid delegation binding for '{type_name}.{field_name}': {reason}
    InvalidBinding {
        /// The extended type.
        type_name: String,
        /// The extension field.
        field_name: String,
        /// What is wrong with the binding.
        reason: String,
    },

    /// invalid type extension: {reason}
    InvalidExtension {
        /// What is wrong with the extension.
        reason: String,
    },

    /// the merged schema is invalid: {reason}
    InvalidSchema {
        /// The validation diagnostics.
        reason: String,
    },
}

/// Errors raised while building the stitched service at startup.
#[derive(Error, Display, Debug)]
pub enum ServiceBuildError {
    /// couldn't discover a source schema: {0}
    Discovery(#[from] SchemaDiscoveryError),

    /// couldn't compose the stitched schema: {0}
    Composition(#[from] CompositionError),

    /// invalid configuration: {0}
    Configuration(#[from] ConfigurationError),
}

/// Errors returned by the router.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum RouterError {
    /// failed to build the stitched service: {0}
    ServiceBuild(#[from] ServiceBuildError),

    /// could not create the HTTP server: {0}
    ServerCreation(std::io::Error),

    /// the HTTP server stopped unexpectedly: {0}
    Serve(std::io::Error),

    /// the server task was aborted
    Aborted,
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn http_errors_carry_service_and_status() {
        let error = FetchError::SubrequestHttpError {
            status_code: Some(503),
            service: "comments".to_string(),
            reason: "service unavailable".to_string(),
        }
        .to_graphql_error(Some(Path::from("post/comments")));

        assert_eq!(
            error.message,
            "HTTP fetch failed from 'comments': service unavailable"
        );
        assert_eq!(error.path, Some(Path::from("post/comments")));
        assert_eq!(
            serde_json_bytes::Value::Object(error.extensions),
            json!({
                "service": "comments",
                "code": "SUBREQUEST_HTTP_ERROR",
                "http": {"status": 503}
            })
        );
    }

    #[test]
    fn missing_dependency_is_a_field_error() {
        let error = DelegationError::MissingDependency {
            type_name: "Comment".to_string(),
            field_name: "post".to_string(),
            attribute: "postId".to_string(),
        }
        .to_graphql_error(Path::from("comment/post"));
        assert_eq!(
            error.message,
            "cannot resolve 'Comment.post': the parent entity has no 'postId' attribute"
        );
        assert_eq!(error.extension_code().as_deref(), Some("MISSING_DEPENDENCY"));
    }
}
