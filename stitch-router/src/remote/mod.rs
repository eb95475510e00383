//! Remote schemas: one per upstream source, built from its introspection result.

mod introspection;
mod link;

use std::fmt;
use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::validation::Valid;
pub(crate) use introspection::DirectiveDefinition;
pub(crate) use introspection::FieldDefinition;
pub(crate) use introspection::FullType;
pub(crate) use introspection::INTROSPECTION_QUERY;
pub(crate) use introspection::IntrospectedSchema;
pub(crate) use introspection::ROOT_TYPE_NAMES;
pub(crate) use introspection::encode_definitions;
pub(crate) use introspection::introspect_locally;
pub(crate) use link::HttpLink;
pub use link::Link;
use url::Url;

use crate::configuration::ConfigurationError;
use crate::configuration::Source;
use crate::context::Context;
use crate::error::FetchError;
use crate::error::SchemaDiscoveryError;
use crate::graphql;
use crate::json_ext::Value;

/// An upstream source: its name, endpoint and the link used to reach it.
#[derive(Clone)]
pub struct SourceDescriptor {
    name: String,
    url: Url,
    link: Arc<dyn Link>,
}

impl fmt::Debug for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDescriptor")
            .field("name", &self.name)
            .field("url", &self.url.as_str())
            .finish()
    }
}

impl SourceDescriptor {
    pub fn new(name: impl Into<String>, url: Url, link: Arc<dyn Link>) -> Self {
        Self {
            name: name.into(),
            url,
            link,
        }
    }

    /// A descriptor using [`HttpLink`].
    pub(crate) fn from_config(name: &str, source: &Source) -> Result<Self, ConfigurationError> {
        Ok(Self::new(
            name,
            source.url(name)?,
            Arc::new(HttpLink::new(name, source)?),
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// A local proxy of an upstream schema. Executing an operation on it forwards the operation
/// to the source.
#[derive(Debug)]
pub struct RemoteSchema {
    descriptor: SourceDescriptor,
    introspection: IntrospectedSchema,
    schema: Valid<Schema>,
}

impl RemoteSchema {
    /// Discovers the schema of a source with the introspection query.
    pub async fn introspect(descriptor: SourceDescriptor) -> Result<Self, SchemaDiscoveryError> {
        let service = descriptor.name.clone();
        tracing::debug!(service = %service, url = %descriptor.url, "introspecting source");

        let request = graphql::Request::builder()
            .query(INTROSPECTION_QUERY)
            .operation_name("IntrospectionQuery")
            .build();
        let response = descriptor
            .link
            .execute(request, &Context::new())
            .await
            .map_err(|e| SchemaDiscoveryError::Fetch {
                service: service.clone(),
                reason: e.to_string(),
            })?;

        let malformed = |reason: String| SchemaDiscoveryError::MalformedIntrospection {
            service: service.clone(),
            reason,
        };
        let schema = match response.data {
            Some(Value::Object(mut data)) => data.remove("__schema"),
            _ => None,
        };
        let Some(schema) = schema.filter(|schema| !schema.is_null()) else {
            let reason = response
                .errors
                .first()
                .map(|error| error.message.clone())
                .unwrap_or_else(|| "`__schema` is missing".to_string());
            return Err(malformed(reason));
        };
        let introspection: IntrospectedSchema =
            serde_json_bytes::from_value(schema).map_err(|e| malformed(e.to_string()))?;

        Self::from_introspection(descriptor, introspection)
    }

    /// Builds a source from a local SDL document, without a network round trip.
    pub fn from_sdl(descriptor: SourceDescriptor, sdl: &str) -> Result<Self, SchemaDiscoveryError> {
        let invalid = |reason: String| SchemaDiscoveryError::InvalidSchema {
            service: descriptor.name.clone(),
            reason,
        };
        let schema = Schema::parse_and_validate(sdl, format!("{}.graphql", descriptor.name))
            .map_err(|e| invalid(e.errors.to_string()))?;
        let introspection = introspect_locally(&schema).map_err(invalid)?;
        Self::from_introspection(descriptor, introspection)
    }

    fn from_introspection(
        descriptor: SourceDescriptor,
        mut introspection: IntrospectedSchema,
    ) -> Result<Self, SchemaDiscoveryError> {
        introspection.canonicalize_roots();
        let sdl = introspection.encode();
        let schema = Schema::parse_and_validate(&sdl, format!("{}.graphql", descriptor.name))
            .map_err(|e| SchemaDiscoveryError::InvalidSchema {
                service: descriptor.name.clone(),
                reason: e.errors.to_string(),
            })?;
        tracing::info!(
            service = %descriptor.name,
            types = schema.types.len(),
            "discovered source schema"
        );
        Ok(Self {
            descriptor,
            introspection,
            schema,
        })
    }

    /// Forwards an operation to the source.
    pub async fn execute(
        &self,
        request: graphql::Request,
        context: &Context,
    ) -> Result<graphql::Response, FetchError> {
        self.descriptor.link.execute(request, context).await
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    /// The source schema, with root types named `Query`, `Mutation` and `Subscription`.
    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    pub(crate) fn introspection(&self) -> &IntrospectedSchema {
        &self.introspection
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json_bytes::json;

    use super::*;

    #[derive(Debug)]
    struct CannedLink {
        responses: Mutex<Vec<Result<graphql::Response, FetchError>>>,
        requests: Mutex<Vec<graphql::Request>>,
    }

    impl CannedLink {
        fn new(response: Result<graphql::Response, FetchError>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(vec![response]),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Link for CannedLink {
        async fn execute(
            &self,
            request: graphql::Request,
            _context: &Context,
        ) -> Result<graphql::Response, FetchError> {
            self.requests.lock().unwrap().push(request);
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn descriptor(link: Arc<dyn Link>) -> SourceDescriptor {
        SourceDescriptor::new("posts", Url::parse("http://posts.test/graphql").unwrap(), link)
    }

    const POSTS: &str = "type Query { post(id: ID!): Post } type Post { id: ID! title: String! }";

    fn introspection_data() -> graphql::Response {
        let schema = Schema::parse_and_validate(POSTS, "posts.graphql").unwrap();
        let introspected = introspect_locally(&schema).unwrap();
        graphql::Response::builder()
            .data(json!({ "__schema": serde_json_bytes::to_value(introspected).unwrap() }))
            .build()
    }

    #[tokio::test]
    async fn introspection_builds_a_schema() {
        let link = CannedLink::new(Ok(introspection_data()));
        let remote = RemoteSchema::introspect(descriptor(link.clone()))
            .await
            .unwrap();

        assert_eq!(remote.name(), "posts");
        assert!(remote.schema().get_object("Post").is_some());
        let requests = link.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].operation_name.as_deref(),
            Some("IntrospectionQuery")
        );
    }

    #[tokio::test]
    async fn transport_failures_are_discovery_errors() {
        let link = CannedLink::new(Err(FetchError::SubrequestHttpError {
            status_code: Some(502),
            service: "posts".to_string(),
            reason: "Bad Gateway".to_string(),
        }));
        let error = RemoteSchema::introspect(descriptor(link)).await.unwrap_err();
        assert!(matches!(error, SchemaDiscoveryError::Fetch { .. }));
    }

    #[tokio::test]
    async fn errors_without_schema_are_malformed() {
        let link = CannedLink::new(Ok(graphql::Response::from_errors(vec![
            graphql::Error::builder()
                .message("introspection is disabled")
                .build(),
        ])));
        let error = RemoteSchema::introspect(descriptor(link)).await.unwrap_err();
        assert_eq!(
            error.to_string(),
            "'posts' returned an invalid introspection result: introspection is disabled"
        );
    }

    #[test]
    fn invalid_sdl_is_rejected() {
        let link = CannedLink::new(Ok(graphql::Response::default()));
        let error = RemoteSchema::from_sdl(descriptor(link), "type Query { post: Missing }")
            .unwrap_err();
        assert!(matches!(error, SchemaDiscoveryError::InvalidSchema { .. }));
    }

    #[test]
    fn sdl_sources_need_no_network() {
        let link = CannedLink::new(Ok(graphql::Response::default()));
        let remote = RemoteSchema::from_sdl(descriptor(link.clone()), POSTS).unwrap();
        assert_eq!(remote.introspection().root_type_names(), ["Query"]);
        assert!(link.requests.lock().unwrap().is_empty());
    }
}
