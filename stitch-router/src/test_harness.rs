//! In-memory upstream sources and a builder for the stitched service, for tests.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use apollo_compiler::ast::OperationType;
use apollo_compiler::executable::Selection;
use apollo_compiler::resolvers::Execution;
use apollo_compiler::resolvers::FieldError;
use apollo_compiler::resolvers::ObjectValue;
use apollo_compiler::resolvers::ResolveInfo;
use apollo_compiler::resolvers::ResolvedValue;
use apollo_compiler::response::GraphQLError;
use apollo_compiler::response::JsonMap;
use apollo_compiler::response::JsonValue;
use apollo_compiler::validation::Valid;
use tower::BoxError;
use tower::ServiceExt;
use url::Url;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::Respond;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;

use crate::configuration::Configuration;
use crate::configuration::Source;
use crate::configuration::Stitching;
use crate::context::Context;
use crate::error::FetchError;
use crate::error::SchemaDiscoveryError;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::remote::Link;
use crate::remote::RemoteSchema;
use crate::remote::SourceDescriptor;
use crate::services::StitchedServiceFactory;
use crate::services::new_service::ServiceFactory;
use crate::services::supergraph;
use crate::stitching::DelegationBinding;
use crate::stitching::merge;

pub const POSTS_SCHEMA: &str = include_str!("../testdata/posts.graphql");
pub const COMMENTS_SCHEMA: &str = include_str!("../testdata/comments.graphql");
pub const EXTENSIONS: &str = include_str!("../testdata/extensions.graphql");

/// An upstream GraphQL source answering from a fixed set of records.
///
/// Root query fields return the records of their named type whose fields match the arguments.
/// Object arguments such as `filter: {postId: "p1"}` are flattened to their entries and null
/// arguments are ignored. List fields return every match, other fields the first one.
/// Root mutation fields return a record made of their arguments.
pub struct MockSource {
    name: String,
    url: Url,
    schema: Valid<Schema>,
    records: Vec<(String, Object)>,
    requests: Mutex<Vec<graphql::Request>>,
    unreachable: AtomicBool,
}

impl std::fmt::Debug for MockSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSource")
            .field("name", &self.name)
            .field("records", &self.records.len())
            .finish()
    }
}

impl MockSource {
    pub fn new(name: &str, sdl: &str) -> Result<Self, BoxError> {
        let schema = Schema::parse_and_validate(sdl, format!("{name}.graphql"))
            .map_err(|e| e.errors.to_string())?;
        Ok(Self {
            name: name.to_string(),
            url: Url::parse(&format!("http://{name}.mock/graphql"))?,
            schema,
            records: Vec::new(),
            requests: Mutex::new(Vec::new()),
            unreachable: AtomicBool::new(false),
        })
    }

    /// The posts source of the demo gateway, with posts `p1` and `p2`.
    pub fn canned_posts() -> Result<Self, BoxError> {
        Ok(Self::new("posts", POSTS_SCHEMA)?
            .with_record(
                "Post",
                serde_json_bytes::json!({"id": "p1", "title": "Stitching schemas", "text": "Two sources, one graph"}),
            )
            .with_record(
                "Post",
                serde_json_bytes::json!({"id": "p2", "title": "Caching", "text": "maxAge everywhere"}),
            ))
    }

    /// The comments source of the demo gateway: `c1` and `c2` on `p1`, `c3` on `p2`.
    pub fn canned_comments() -> Result<Self, BoxError> {
        Ok(Self::new("comments", COMMENTS_SCHEMA)?
            .with_record(
                "Comment",
                serde_json_bytes::json!({"id": "c1", "text": "First!", "postId": "p1"}),
            )
            .with_record(
                "Comment",
                serde_json_bytes::json!({"id": "c2", "text": "Nice read", "postId": "p1"}),
            )
            .with_record(
                "Comment",
                serde_json_bytes::json!({"id": "c3", "text": "Cache all the things", "postId": "p2"}),
            ))
    }

    /// Adds a record of an object type. Values that are not objects are ignored.
    pub fn with_record(mut self, type_name: &str, record: Value) -> Self {
        match record {
            Value::Object(record) => self.records.push((type_name.to_string(), record)),
            other => tracing::warn!(?other, "mock records must be objects"),
        }
        self
    }

    /// Fails every following request as if the source could not be reached.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<graphql::Request> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn descriptor(self: &Arc<Self>) -> SourceDescriptor {
        SourceDescriptor::new(self.name.clone(), self.url.clone(), self.clone())
    }

    /// Introspects this source through its link.
    pub async fn remote_schema(self: &Arc<Self>) -> Result<RemoteSchema, SchemaDiscoveryError> {
        RemoteSchema::introspect(self.descriptor()).await
    }

    /// Answers a GraphQL request.
    pub fn respond(&self, request: &graphql::Request) -> graphql::Response {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.execute_sync(request).unwrap_or_else(|errors| {
            graphql::Response::builder()
                .errors(errors.into_iter().map(Into::into).collect())
                .build()
        })
    }

    fn execute_sync(
        &self,
        request: &graphql::Request,
    ) -> Result<graphql::Response, Vec<GraphQLError>> {
        let query = request.query.as_deref().unwrap_or("");
        let doc = ExecutableDocument::parse_and_validate(&self.schema, query, "query")
            .map_err(|e| e.errors.iter().map(|e| e.to_json()).collect::<Vec<_>>())?;
        let operation = doc
            .operations
            .get(request.operation_name.as_deref())
            .map_err(|e| vec![e.to_graphql_error(&doc.sources)])?;

        let is_introspection = operation.selection_set.selections.iter().all(|selection| {
            matches!(selection, Selection::Field(field) if field.name.starts_with("__"))
        });
        let result = if is_introspection {
            let variables = apollo_compiler::request::coerce_variable_values(
                &self.schema,
                operation,
                &request.variables,
            )
            .map_err(|e| vec![e.to_graphql_error(&doc.sources)])?;
            apollo_compiler::introspection::partial_execute(
                &self.schema,
                &self.schema.implementers_map(),
                &doc,
                operation,
                &variables,
            )
        } else {
            let root = RootResolver {
                source: self,
                type_name: match operation.operation_type {
                    OperationType::Query => "Query",
                    OperationType::Mutation => "Mutation",
                    OperationType::Subscription => "Subscription",
                },
                mutation: operation.operation_type == OperationType::Mutation,
            };
            Execution::new(&self.schema, &doc)
                .operation(operation)
                .raw_variable_values(&request.variables)
                .execute_sync(&root)
        };
        match result {
            Ok(response) => Ok(graphql::Response::builder()
                .data(JsonValue::from(response.data))
                .errors(response.errors.into_iter().map(Into::into).collect())
                .build()),
            Err(request_error) => Err(vec![request_error.to_graphql_error(&doc.sources)]),
        }
    }

    fn matching_records<'a>(
        &'a self,
        type_name: &'a str,
        arguments: &'a JsonMap,
    ) -> impl Iterator<Item = &'a (String, Object)> + 'a {
        let filters: Vec<(&str, &JsonValue)> = arguments
            .iter()
            .flat_map(|(name, value)| match value {
                JsonValue::Object(entries) => entries
                    .iter()
                    .map(|(key, value)| (key.as_str(), value))
                    .collect::<Vec<_>>(),
                value => vec![(name.as_str(), value)],
            })
            .filter(|(_, value)| !value.is_null())
            .collect();
        self.records.iter().filter(move |(record_type, record)| {
            (record_type == type_name || self.schema.is_subtype(type_name, record_type))
                && filters
                    .iter()
                    .all(|(key, value)| record.get(*key) == Some(*value))
        })
    }
}

#[async_trait::async_trait]
impl Link for MockSource {
    async fn execute(
        &self,
        request: graphql::Request,
        context: &Context,
    ) -> Result<graphql::Response, FetchError> {
        context.count_upstream_call();
        if self.unreachable.load(Ordering::SeqCst) {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request);
            }
            return Err(FetchError::SubrequestHttpError {
                status_code: None,
                service: self.name.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(self.respond(&request))
    }
}

struct RootResolver<'a> {
    source: &'a MockSource,
    type_name: &'a str,
    mutation: bool,
}

struct RecordResolver<'a> {
    type_name: &'a str,
    record: &'a JsonMap,
}

impl ObjectValue for RootResolver<'_> {
    fn type_name(&self) -> &str {
        self.type_name
    }

    fn resolve_field<'a>(
        &'a self,
        info: &'a ResolveInfo<'a>,
    ) -> Result<ResolvedValue<'a>, FieldError> {
        let ty = &info.field_definition().ty;
        let type_name = ty.inner_named_type().as_str();
        if self.mutation {
            return Ok(ResolvedValue::object(RecordResolver {
                type_name,
                record: info.arguments(),
            }));
        }
        let mut matches = self
            .source
            .matching_records(type_name, info.arguments())
            .map(|(record_type, record)| {
                Ok(ResolvedValue::object(RecordResolver {
                    type_name: record_type,
                    record,
                }))
            });
        if ty.is_list() {
            Ok(ResolvedValue::List(Box::new(matches)))
        } else {
            matches
                .next()
                .unwrap_or_else(|| Ok(ResolvedValue::leaf(JsonValue::Null)))
        }
    }
}

impl ObjectValue for RecordResolver<'_> {
    fn type_name(&self) -> &str {
        self.type_name
    }

    fn resolve_field<'a>(
        &'a self,
        info: &'a ResolveInfo<'a>,
    ) -> Result<ResolvedValue<'a>, FieldError> {
        match self.record.get(info.field_name()) {
            Some(value) => resolve_value(value, info),
            None => Ok(ResolvedValue::leaf(JsonValue::Null)),
        }
    }
}

fn resolve_value<'a>(
    value: &'a JsonValue,
    info: &'a ResolveInfo<'a>,
) -> Result<ResolvedValue<'a>, FieldError> {
    match value {
        JsonValue::Object(record) => Ok(ResolvedValue::object(RecordResolver {
            type_name: record
                .get("__typename")
                .and_then(JsonValue::as_str)
                .unwrap_or_else(|| info.field_definition().ty.inner_named_type()),
            record,
        })),
        JsonValue::Array(values) => Ok(ResolvedValue::List(Box::new(
            values.iter().map(move |value| resolve_value(value, info)),
        ))),
        leaf => Ok(ResolvedValue::leaf(leaf.clone())),
    }
}

/// A [`MockSource`] served over HTTP.
pub struct MockUpstream {
    server: MockServer,
    source: Arc<MockSource>,
}

struct SourceResponder(Arc<MockSource>);

impl Respond for SourceResponder {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        if self.0.unreachable.load(Ordering::SeqCst) {
            return ResponseTemplate::new(503).set_body_string("service unavailable");
        }
        match serde_json::from_slice::<graphql::Request>(&request.body) {
            Ok(request) => ResponseTemplate::new(200).set_body_json(self.0.respond(&request)),
            Err(error) => ResponseTemplate::new(400).set_body_string(error.to_string()),
        }
    }
}

impl MockUpstream {
    pub async fn start(source: MockSource) -> Self {
        let server = MockServer::start().await;
        let source = Arc::new(source);
        Mock::given(method("POST"))
            .respond_with(SourceResponder(source.clone()))
            .mount(&server)
            .await;
        Self { server, source }
    }

    /// The endpoint of this source.
    pub fn uri(&self) -> String {
        format!("{}/graphql", self.server.uri())
    }

    pub fn source(&self) -> &Arc<MockSource> {
        &self.source
    }

    /// The HTTP requests received so far, headers included.
    pub async fn received_requests(&self) -> Vec<wiremock::Request> {
        self.server.received_requests().await.unwrap_or_default()
    }
}

/// Builder for the stitched GraphQL service over [`MockSource`]s, as a [`tower::Service`].
///
/// Nothing goes over the network: upstream calls are answered in process.
pub struct TestHarness {
    sources: Vec<Arc<MockSource>>,
    extensions: Vec<String>,
    bindings: Vec<DelegationBinding>,
    configuration: Option<Configuration>,
}

#[buildstructor::buildstructor]
impl TestHarness {
    #[builder(visibility = "pub")]
    fn new(
        sources: Vec<Arc<MockSource>>,
        extensions: Vec<String>,
        bindings: Vec<DelegationBinding>,
        configuration: Option<Configuration>,
    ) -> Self {
        Self {
            sources,
            extensions,
            bindings,
            configuration,
        }
    }

    /// The demo gateway: canned posts and comments, their type extensions and bindings.
    pub fn canned(posts: Arc<MockSource>, comments: Arc<MockSource>) -> Self {
        Self {
            sources: vec![posts, comments],
            extensions: vec![EXTENSIONS.to_string()],
            bindings: canned_bindings(),
            configuration: None,
        }
    }

    /// Replaces the configuration. Its sources, extensions and bindings are ignored.
    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    async fn factory(self) -> Result<StitchedServiceFactory, BoxError> {
        let mut remote_schemas = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            remote_schemas.push(source.remote_schema().await?);
        }
        let extensions: Vec<&str> = self.extensions.iter().map(String::as_str).collect();
        let schema = merge(remote_schemas, &extensions, self.bindings)?;
        let configuration = match self.configuration {
            Some(configuration) => configuration,
            None => Configuration::builder()
                .sources(
                    self.sources
                        .iter()
                        .map(|source| (source.name.clone(), Source::new(source.url.as_str())))
                        .collect(),
                )
                .stitching(Stitching::default())
                .build()?,
        };
        Ok(StitchedServiceFactory::new(
            Arc::new(schema),
            Arc::new(configuration),
        ))
    }

    /// Builds the GraphQL service.
    pub async fn build(self) -> Result<supergraph::BoxCloneService, BoxError> {
        let factory = self.factory().await?;
        Ok(tower::service_fn(move |request: supergraph::Request| {
            let service = factory.create();
            async move { service.oneshot(request).await }
        })
        .boxed_clone())
    }

    /// Builds the HTTP front-end, without binding a socket.
    pub async fn build_router(self) -> Result<axum::Router, BoxError> {
        let factory = self.factory().await?;
        Ok(crate::axum_factory::make_router(Arc::new(factory))?)
    }
}

/// Configuration of the demo gateway over the given endpoints, listening on an ephemeral port.
pub fn canned_configuration(posts_url: &str, comments_url: &str) -> Result<Configuration, BoxError> {
    let extensions = EXTENSIONS
        .lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n");
    let yaml = format!(
        r#"
server:
  listen: 127.0.0.1:0
sources:
  posts:
    url: {posts_url}
    timeout: 2s
  comments:
    url: {comments_url}
    timeout: 2s
stitching:
  extensions: |
{extensions}
  bindings:
    - type: Query
      field: getPosts
      source: posts
      target: allPosts
    - type: Post
      field: comments
      source: comments
      target: allComments
      requires: [id]
      arguments:
        filter:
          postId: {{ $parent: id }}
    - type: Comment
      field: post
      source: posts
      target: Post
      requires: [postId]
      arguments:
        id: {{ $parent: postId }}
"#
    );
    Ok(yaml.parse()?)
}

/// Bindings of the demo gateway.
pub fn canned_bindings() -> Vec<DelegationBinding> {
    use crate::stitching::ArgumentRule;
    vec![
        DelegationBinding::new("Query", "getPosts", "posts", "allPosts"),
        DelegationBinding::new("Post", "comments", "comments", "allComments")
            .requires(["id"])
            .arguments(ArgumentRule::template(serde_json_bytes::json!({
                "filter": {"postId": {"$parent": "id"}}
            }))),
        DelegationBinding::new("Comment", "post", "posts", "Post")
            .requires(["postId"])
            .arguments(ArgumentRule::template(serde_json_bytes::json!({
                "id": {"$parent": "postId"}
            }))),
    ]
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    fn query(source: &MockSource, query: &str) -> graphql::Response {
        source.respond(&graphql::Request::builder().query(query).build())
    }

    #[test]
    fn arguments_filter_records() {
        let comments = MockSource::canned_comments().unwrap();
        let response = query(
            &comments,
            r#"{ allComments(filter: {postId: "p1"}) { id } Comment(id: "c3") { text } }"#,
        );
        assert_eq!(
            response.data,
            Some(json!({
                "allComments": [{"id": "c1"}, {"id": "c2"}],
                "Comment": {"text": "Cache all the things"}
            }))
        );
        assert_eq!(comments.requests().len(), 1);
    }

    #[test]
    fn missing_records_are_null() {
        let posts = MockSource::canned_posts().unwrap();
        let response = query(&posts, r#"{ Post(id: "p9") { id } }"#);
        assert_eq!(response.data, Some(json!({"Post": null})));
    }

    #[test]
    fn mutations_echo_arguments() {
        let posts = MockSource::canned_posts().unwrap();
        let response = query(
            &posts,
            r#"mutation { createPost(title: "New") { title __typename } }"#,
        );
        assert_eq!(
            response.data,
            Some(json!({"createPost": {"title": "New", "__typename": "Post"}}))
        );
    }

    #[test]
    fn invalid_queries_are_errors() {
        let posts = MockSource::canned_posts().unwrap();
        let response = query(&posts, "{ nope }");
        assert!(response.data.is_none());
        assert_eq!(response.errors.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_sources_fail_requests() {
        let posts = Arc::new(MockSource::canned_posts().unwrap());
        posts.set_unreachable(true);
        let error = posts
            .execute(
                graphql::Request::builder().query("{ allPosts { id } }").build(),
                &Context::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::SubrequestHttpError { .. }));
    }
}
