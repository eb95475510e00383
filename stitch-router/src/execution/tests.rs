use std::sync::Arc;

use serde_json_bytes::json;

use super::*;
use crate::cache::CacheScope;
use crate::error::FetchError;
use crate::remote::Link;
use crate::remote::SourceDescriptor;
use crate::stitching::ArgumentRule;
use crate::stitching::DelegationBinding;
use crate::stitching::merge;
use crate::test_harness::EXTENSIONS;
use crate::test_harness::MockSource;
use crate::test_harness::canned_bindings;

struct Gateway {
    schema: MergedSchema,
    posts: Arc<MockSource>,
    comments: Arc<MockSource>,
}

impl Gateway {
    async fn new(posts: MockSource, comments: MockSource) -> Self {
        Self::extended(posts, comments, &[EXTENSIONS], canned_bindings()).await
    }

    async fn extended(
        posts: MockSource,
        comments: MockSource,
        extensions: &[&str],
        bindings: Vec<DelegationBinding>,
    ) -> Self {
        let posts = Arc::new(posts);
        let comments = Arc::new(comments);
        let schema = merge(
            vec![
                posts.remote_schema().await.unwrap(),
                comments.remote_schema().await.unwrap(),
            ],
            extensions,
            bindings,
        )
        .unwrap();
        Self {
            schema,
            posts,
            comments,
        }
    }

    async fn canned() -> Self {
        Self::new(
            MockSource::canned_posts().unwrap(),
            MockSource::canned_comments().unwrap(),
        )
        .await
    }

    async fn run_with(
        &self,
        request: graphql::Request,
        options: ExecutionOptions,
    ) -> (graphql::Response, CachePolicy, Context) {
        let context = Context::new();
        let prepared = prepare(&self.schema, &request, &options).unwrap();
        let (response, policy) = execute(&self.schema, &prepared, &context, &options).await;
        (response, policy, context)
    }

    async fn run(&self, query: &str) -> graphql::Response {
        let request = graphql::Request::builder().query(query).build();
        self.run_with(request, ExecutionOptions::default()).await.0
    }

    fn reject(&self, request: graphql::Request, options: ExecutionOptions) -> Rejection {
        prepare(&self.schema, &request, &options).unwrap_err()
    }
}

/// Requests a source received, without the introspection made when merging.
fn forwarded(source: &MockSource) -> Vec<graphql::Request> {
    source
        .requests()
        .into_iter()
        .filter(|request| {
            !request
                .query
                .as_deref()
                .is_some_and(|query| query.contains("__schema"))
        })
        .collect()
}

/// Answers like the wrapped source, minus the attributes fetched for delegated fields.
#[derive(Debug)]
struct WithoutRequiredAttributes(Arc<MockSource>);

#[async_trait::async_trait]
impl Link for WithoutRequiredAttributes {
    async fn execute(
        &self,
        request: graphql::Request,
        context: &Context,
    ) -> Result<graphql::Response, FetchError> {
        let mut response = self.0.execute(request, context).await?;
        if let Some(data) = response.data.as_mut() {
            drop_required_attributes(data);
        }
        Ok(response)
    }
}

fn drop_required_attributes(value: &mut Value) {
    match value {
        Value::Object(object) => {
            let required: Vec<String> = object
                .keys()
                .filter(|key| key.as_str().starts_with("_stitch_required_"))
                .map(|key| key.as_str().to_string())
                .collect();
            for key in required {
                object.remove(key.as_str());
            }
            for child in object.values_mut() {
                drop_required_attributes(child);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(drop_required_attributes),
        _ => {}
    }
}

fn codes(response: &graphql::Response) -> Vec<String> {
    response
        .errors
        .iter()
        .filter_map(|error| error.extension_code())
        .collect()
}

#[tokio::test]
async fn native_fields_match_the_source() {
    let gateway = Gateway::canned().await;
    let query = r#"{ Post(id: "p1") { id title text } allPosts { id } }"#;
    let stitched = gateway.run(query).await;
    let direct = gateway
        .posts
        .respond(&graphql::Request::builder().query(query).build());

    assert_eq!(stitched.data, direct.data);
    assert!(stitched.errors.is_empty());
}

#[tokio::test]
async fn comments_are_delegated_by_post_id() {
    let gateway = Gateway::canned().await;
    let response = gateway
        .run(r#"{ Post(id: "p1") { id comments { id } } }"#)
        .await;

    assert_eq!(
        response.data,
        Some(json!({"Post": {"id": "p1", "comments": [{"id": "c1"}, {"id": "c2"}]}}))
    );
    assert!(response.errors.is_empty());
    let delegated = forwarded(&gateway.comments);
    assert_eq!(delegated.len(), 1);
    assert_eq!(
        Value::Object(delegated[0].variables.clone()),
        json!({"_stitch_arg_filter": {"postId": "p1"}})
    );
}

#[tokio::test]
async fn posts_are_delegated_by_foreign_key() {
    let gateway = Gateway::canned().await;
    let response = gateway
        .run(r#"{ Comment(id: "c3") { text post { id title } } }"#)
        .await;

    assert_eq!(
        response.data,
        Some(json!({"Comment": {"text": "Cache all the things", "post": {"id": "p2", "title": "Caching"}}}))
    );
}

#[tokio::test]
async fn nested_delegation_with_aliases_and_fragments() {
    let gateway = Gateway::canned().await;
    let response = gateway
        .run(
            r#"query Feed {
                feed: getPosts {
                    id
                    replies: comments { ...reply }
                }
            }
            fragment reply on Comment { id post { title } __typename }"#,
        )
        .await;

    assert_eq!(
        response.data,
        Some(json!({"feed": [
            {"id": "p1", "replies": [
                {"id": "c1", "post": {"title": "Stitching schemas"}, "__typename": "Comment"},
                {"id": "c2", "post": {"title": "Stitching schemas"}, "__typename": "Comment"}
            ]},
            {"id": "p2", "replies": [
                {"id": "c3", "post": {"title": "Caching"}, "__typename": "Comment"}
            ]}
        ]}))
    );
    assert!(response.errors.is_empty());
}

#[tokio::test]
async fn unreachable_source_only_fails_its_fields() {
    let gateway = Gateway::canned().await;
    gateway.comments.set_unreachable(true);
    let response = gateway
        .run(r#"{ Post(id: "p1") { id comments { id } } }"#)
        .await;

    assert_eq!(
        response.data,
        Some(json!({"Post": {"id": "p1", "comments": null}}))
    );
    assert_eq!(response.errors.len(), 1);
    let error = &response.errors[0];
    assert_eq!(error.path, Some(Path::from("Post/comments")));
    assert_eq!(error.extension_code().as_deref(), Some("SUBREQUEST_HTTP_ERROR"));
    assert_eq!(
        error.extensions.get("service"),
        Some(&Value::from("comments"))
    );
}

#[tokio::test]
async fn nulls_propagate_to_the_nearest_nullable_parent() {
    let gateway = Gateway::canned().await;
    gateway.posts.set_unreachable(true);
    let response = gateway.run("{ getPosts { id } }").await;

    // getPosts is non-null, so the whole data becomes null with a single error
    assert_eq!(response.data, Some(Value::Null));
    assert_eq!(codes(&response), ["SUBREQUEST_HTTP_ERROR"]);
    assert_eq!(response.errors[0].path, Some(Path::from("getPosts")));
}

#[tokio::test]
async fn null_requirements_skip_the_upstream_call() {
    let gateway = Gateway::new(
        MockSource::canned_posts().unwrap(),
        MockSource::canned_comments()
            .unwrap()
            .with_record("Comment", json!({"id": "c9", "text": "Orphan", "postId": null})),
    )
    .await;
    let request = graphql::Request::builder()
        .query(r#"{ Comment(id: "c9") { id post { id } } }"#)
        .build();
    let (response, _, context) = gateway
        .run_with(request, ExecutionOptions::default())
        .await;

    assert_eq!(
        response.data,
        Some(json!({"Comment": {"id": "c9", "post": null}}))
    );
    assert!(response.errors.is_empty());
    assert_eq!(context.upstream_calls(), 1);
    assert!(forwarded(&gateway.posts).is_empty());
}

#[tokio::test]
async fn mutations_are_forwarded_in_order() {
    let gateway = Gateway::canned().await;
    let response = gateway
        .run(
            r#"mutation {
                first: createPost(title: "One") { title }
                createComment(postId: "p2", text: "Two") { text post { title } }
                second: createPost(title: "Three") { title }
            }"#,
        )
        .await;

    assert_eq!(
        response.data,
        Some(json!({
            "first": {"title": "One"},
            "createComment": {"text": "Two", "post": {"title": "Caching"}},
            "second": {"title": "Three"}
        }))
    );
    // consecutive fields of one source share an operation, the others do not
    let mutations: Vec<_> = forwarded(&gateway.posts)
        .into_iter()
        .filter_map(|request| request.query)
        .filter(|query| query.starts_with("mutation"))
        .collect();
    assert_eq!(mutations.len(), 2);
}

#[tokio::test]
async fn delegated_mutations_keep_document_order() {
    let mut bindings = canned_bindings();
    bindings.push(
        DelegationBinding::new("Mutation", "publish", "posts", "createPost")
            .operation(OperationKind::Mutation)
            .arguments(ArgumentRule::template(json!({"title": {"$arg": "title"}}))),
    );
    let gateway = Gateway::extended(
        MockSource::canned_posts().unwrap(),
        MockSource::canned_comments().unwrap(),
        &[
            EXTENSIONS,
            "extend type Mutation { publish(title: String!): Post }",
        ],
        bindings,
    )
    .await;
    let response = gateway
        .run(
            r#"mutation {
                first: publish(title: "A") { title }
                second: createPost(title: "B") { title }
            }"#,
        )
        .await;

    assert_eq!(
        response.data,
        Some(json!({"first": {"title": "A"}, "second": {"title": "B"}}))
    );
    assert!(response.errors.is_empty());
    let mutations: Vec<_> = forwarded(&gateway.posts)
        .into_iter()
        .filter(|request| {
            request
                .query
                .as_deref()
                .is_some_and(|query| query.starts_with("mutation"))
        })
        .collect();
    assert_eq!(mutations.len(), 2);
    assert_eq!(
        Value::Object(mutations[0].variables.clone()),
        json!({"_stitch_arg_title": "A"})
    );
    assert!(
        mutations[1]
            .query
            .as_deref()
            .is_some_and(|query| query.contains(r#"createPost(title: "B")"#)),
        "{:?}",
        mutations[1].query
    );
}

#[tokio::test]
async fn unfetched_requirements_fail_only_the_delegated_field() {
    let posts = Arc::new(MockSource::canned_posts().unwrap());
    let comments = Arc::new(MockSource::canned_comments().unwrap());
    let stripped = SourceDescriptor::new(
        "comments",
        comments.url().clone(),
        Arc::new(WithoutRequiredAttributes(comments.clone())),
    );
    let schema = merge(
        vec![
            posts.remote_schema().await.unwrap(),
            RemoteSchema::introspect(stripped).await.unwrap(),
        ],
        &[EXTENSIONS],
        canned_bindings(),
    )
    .unwrap();
    let gateway = Gateway {
        schema,
        posts,
        comments,
    };
    let response = gateway
        .run(r#"{ Comment(id: "c3") { id text post { title } } }"#)
        .await;

    assert_eq!(
        response.data,
        Some(json!({"Comment": {"id": "c3", "text": "Cache all the things", "post": null}}))
    );
    assert_eq!(codes(&response), ["MISSING_DEPENDENCY"]);
    assert_eq!(response.errors[0].path, Some(Path::from("Comment/post")));
    assert!(forwarded(&gateway.posts).is_empty());
}

#[tokio::test]
async fn query_fields_of_one_source_share_an_operation() {
    let gateway = Gateway::canned().await;
    let request = graphql::Request::builder()
        .query(r#"{ a: Post(id: "p1") { id } b: Post(id: "p2") { id } allComments { id } }"#)
        .build();
    let (response, _, context) = gateway
        .run_with(request, ExecutionOptions::default())
        .await;

    assert!(response.errors.is_empty());
    assert_eq!(context.upstream_calls(), 2);
    assert_eq!(forwarded(&gateway.posts).len(), 1);
}

#[tokio::test]
async fn cache_policy_is_the_smallest_hint() {
    let gateway = Gateway::canned().await;
    let options = ExecutionOptions {
        expose_hints: true,
        ..Default::default()
    };
    let request = graphql::Request::builder()
        .query("{ getPosts { title comments { text } } }")
        .build();
    let (response, policy, _) = gateway.run_with(request, options).await;

    assert_eq!(policy.max_age(), 240);
    assert_eq!(policy.scope(), CacheScope::Public);
    assert!(policy.is_shareable());
    let extensions = serde_json::to_value(&response.extensions).unwrap();
    assert_eq!(extensions["cacheControl"]["version"], 1);
    assert_eq!(
        extensions["cacheControl"]["hints"][0],
        serde_json::json!({"path": ["getPosts"], "maxAge": 240})
    );

    // native root fields fall back to the default maxAge of zero
    let request = graphql::Request::builder()
        .query(r#"{ getPosts { id } Post(id: "p1") { id } }"#)
        .build();
    let (_, policy, _) = gateway.run_with(request, options).await;
    assert!(!policy.is_cacheable());

    let request = graphql::Request::builder()
        .query(r#"{ Post(id: "p1") { id } }"#)
        .build();
    let options = ExecutionOptions {
        default_max_age: 60,
        ..Default::default()
    };
    let (response, policy, _) = gateway.run_with(request, options).await;
    assert_eq!(policy.max_age(), 60);
    assert!(response.extensions.is_empty());
}

#[tokio::test]
async fn introspection_is_answered_locally() {
    let gateway = Gateway::canned().await;
    let request = graphql::Request::builder()
        .query(r#"{ __typename __type(name: "Post") { fields { name } } }"#)
        .build();
    let (response, _, context) = gateway
        .run_with(request, ExecutionOptions::default())
        .await;

    assert_eq!(context.upstream_calls(), 0);
    let data = serde_json::to_value(response.data.unwrap()).unwrap();
    assert_eq!(data["__typename"], "Query");
    let fields: Vec<_> = data["__type"]["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|field| field["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(fields, ["id", "title", "text", "createdAt", "comments"]);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let gateway = Gateway::canned().await;
    let options = ExecutionOptions::default();

    let rejection = gateway.reject(graphql::Request::builder().build(), options);
    assert_eq!(rejection.status, StatusCode::BAD_REQUEST);
    assert_eq!(codes(&rejection.response), ["MISSING_QUERY_STRING"]);

    let rejection = gateway.reject(
        graphql::Request::builder().query("{ Post { nope } }").build(),
        options,
    );
    let found = codes(&rejection.response);
    assert!(!found.is_empty());
    assert!(found.iter().all(|code| code == "GRAPHQL_VALIDATION_FAILED"), "{found:?}");

    let rejection = gateway.reject(
        graphql::Request::builder().query("{ getPosts { nope } }").build(),
        options,
    );
    assert_eq!(codes(&rejection.response), ["GRAPHQL_VALIDATION_FAILED"]);

    let rejection = gateway.reject(
        graphql::Request::builder()
            .query("query A { getPosts { id } } query B { getPosts { id } }")
            .build(),
        options,
    );
    assert_eq!(codes(&rejection.response), ["GRAPHQL_VALIDATION_FAILED"]);

    let rejection = gateway.reject(
        graphql::Request::builder()
            .query("query($id: ID) { Post(id: $id) { id } }")
            .variable("id", json!({"not": "an id"}))
            .build(),
        options,
    );
    assert_eq!(codes(&rejection.response), ["VALIDATION_INVALID_TYPE_VARIABLE"]);

    let rejection = gateway.reject(
        graphql::Request::builder()
            .query("{ __schema { queryType { name } } }")
            .build(),
        ExecutionOptions {
            introspection: false,
            ..Default::default()
        },
    );
    assert_eq!(codes(&rejection.response), ["INTROSPECTION_DISABLED"]);
}

#[tokio::test]
async fn repeated_queries_give_identical_data() {
    let gateway = Gateway::canned().await;
    let query = "{ getPosts { id title comments { id text post { id } } } }";
    let first = gateway.run(query).await;
    let second = gateway.run(query).await;

    assert_eq!(
        serde_json::to_vec(&first.data).unwrap(),
        serde_json::to_vec(&second.data).unwrap()
    );
}
