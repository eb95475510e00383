//! Whole response cache.
//!
//! Responses marked shareable by the stitched service (`Cache-Control: max-age=<n>, public`)
//! are stored for `n` seconds and replayed with an `Age` header. Clients sending `no-cache`
//! or `no-store` skip the lookup, `no-store` also skips the write. Requests differing in the
//! values of propagated headers never share an entry.

use std::sync::Arc;
use std::task::Poll;

use futures::future::BoxFuture;
use http::StatusCode;
use tower::BoxError;
use tower::Layer;
use tower::Service;

use crate::cache::CacheControl;
use crate::cache::CacheKey;
use crate::cache::ResponseCache;
use crate::graphql;
use crate::services::SupergraphRequest;
use crate::services::SupergraphResponse;

/// [`Layer`] memoizing shareable responses.
#[derive(Clone)]
pub(crate) struct ResponseCacheLayer {
    cache: Arc<ResponseCache>,
    vary: Arc<Vec<String>>,
}

impl ResponseCacheLayer {
    pub(crate) fn new(cache: Arc<ResponseCache>, vary: Arc<Vec<String>>) -> Self {
        Self { cache, vary }
    }
}

impl<S> Layer<S> for ResponseCacheLayer {
    type Service = ResponseCacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResponseCacheService {
            inner,
            cache: self.cache.clone(),
            vary: self.vary.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct ResponseCacheService<S> {
    inner: S,
    cache: Arc<ResponseCache>,
    vary: Arc<Vec<String>>,
}

impl<S> Service<SupergraphRequest> for ResponseCacheService<S>
where
    S: Service<SupergraphRequest, Response = SupergraphResponse, Error = BoxError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = SupergraphResponse;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: SupergraphRequest) -> Self::Future {
        // the ready service is the one that must be called
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let cache = self.cache.clone();
        let vary = self.vary.clone();

        Box::pin(async move {
            let client = CacheControl::new(request.supergraph_request.headers())
                .unwrap_or_else(|error| {
                    tracing::debug!(%error, "ignoring invalid client cache-control");
                    CacheControl::default()
                });
            let key = CacheKey::new(
                request.supergraph_request.body(),
                request.supergraph_request.headers(),
                &vary,
            );

            if !client.bypasses_cache() {
                if let Some(cached) = cache.get(&key).await {
                    match serde_json::from_slice::<graphql::Response>(&cached.body) {
                        Ok(body) => {
                            tracing::debug!(age = cached.age(), "response cache hit");
                            let mut response =
                                SupergraphResponse::new_from_graphql_response(body, request.context);
                            CacheControl::public(cached.max_age)
                                .with_age(cached.age())
                                .to_headers(response.response.headers_mut())?;
                            return Ok(response);
                        }
                        Err(error) => tracing::warn!(%error, "could not read a cached response"),
                    }
                }
            }

            let response = inner.call(request).await?;

            let policy = CacheControl::new(response.response.headers()).unwrap_or_default();
            let storable = !client.no_store()
                && response.response.status() == StatusCode::OK
                && response.response.body().errors.is_empty()
                && policy.is_shareable();
            if let (true, Some(max_age)) = (storable, policy.max_age()) {
                match serde_json::to_vec(response.response.body()) {
                    Ok(body) => cache.insert(key, body.into(), max_age).await,
                    Err(error) => tracing::warn!(%error, "could not serialize a response to cache"),
                }
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use http::header::AGE;
    use http::header::CACHE_CONTROL;
    use serde_json_bytes::json;
    use tower::ServiceExt;

    use super::*;
    use crate::configuration::Configuration;
    use crate::services::supergraph;
    use crate::test_harness::MockSource;
    use crate::test_harness::TestHarness;

    const CACHEABLE: &str = "{ getPosts { title comments { text } } }";

    struct Fixture {
        service: supergraph::BoxCloneService,
        posts: Arc<MockSource>,
    }

    impl Fixture {
        async fn new(configuration: Option<&str>) -> Self {
            let posts = Arc::new(MockSource::canned_posts().unwrap());
            let comments = Arc::new(MockSource::canned_comments().unwrap());
            let mut harness = TestHarness::canned(posts.clone(), comments);
            if let Some(configuration) = configuration {
                let configuration: Configuration = configuration.parse().unwrap();
                harness = harness.with_configuration(configuration);
            }
            Self {
                service: harness.build().await.unwrap(),
                posts,
            }
        }

        async fn send(&self, query: &str, cache_control: Option<&str>) -> SupergraphResponse {
            match cache_control {
                Some(cache_control) => self.send_with(query, &[("cache-control", cache_control)]).await,
                None => self.send_with(query, &[]).await,
            }
        }

        async fn send_with(&self, query: &str, headers: &[(&str, &str)]) -> SupergraphResponse {
            let mut request = SupergraphRequest::fake_builder().query(query);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            self.service
                .clone()
                .oneshot(request.build().unwrap())
                .await
                .unwrap()
        }

        fn upstream_requests(&self) -> usize {
            self.posts.requests().len()
        }
    }

    #[tokio::test]
    async fn shareable_responses_are_replayed() {
        let fixture = Fixture::new(None).await;
        let first = fixture.send(CACHEABLE, None).await;
        let calls = fixture.upstream_requests();
        let second = fixture.send(CACHEABLE, None).await;

        assert_eq!(fixture.upstream_requests(), calls);
        assert_eq!(first.response.body(), second.response.body());
        assert_eq!(second.response.headers()[CACHE_CONTROL], "max-age=240, public");
        // stored less than a second ago
        assert!(second.response.headers().get(AGE).is_none());
    }

    #[tokio::test]
    async fn clients_can_bypass_the_cache() {
        let fixture = Fixture::new(None).await;
        fixture.send(CACHEABLE, None).await;
        let calls = fixture.upstream_requests();

        fixture.send(CACHEABLE, Some("no-cache")).await;
        assert!(fixture.upstream_requests() > calls);
    }

    #[tokio::test]
    async fn no_store_responses_are_not_kept() {
        let fixture = Fixture::new(None).await;
        fixture.send(CACHEABLE, Some("no-store")).await;
        let calls = fixture.upstream_requests();

        fixture.send(CACHEABLE, None).await;
        assert!(fixture.upstream_requests() > calls);
    }

    #[tokio::test]
    async fn uncacheable_responses_are_not_kept() {
        let fixture = Fixture::new(None).await;
        let query = r#"{ Post(id: "p1") { id title } }"#;
        let first = fixture.send(query, None).await;
        assert_eq!(
            first.response.body().data,
            Some(json!({"Post": {"id": "p1", "title": "Stitching schemas"}}))
        );
        let calls = fixture.upstream_requests();

        fixture.send(query, None).await;
        assert!(fixture.upstream_requests() > calls);
    }

    #[tokio::test]
    async fn callers_with_different_credentials_do_not_share_entries() {
        let fixture = Fixture::new(Some(
            r#"
sources:
  posts:
    url: http://posts.mock/graphql
  comments:
    url: http://comments.mock/graphql
headers:
  propagate: [authorization]
"#,
        ))
        .await;
        let alice = [("authorization", "Bearer alice")];
        fixture.send_with(CACHEABLE, &alice).await;
        let calls = fixture.upstream_requests();

        fixture.send_with(CACHEABLE, &alice).await;
        assert_eq!(fixture.upstream_requests(), calls);

        let bob = fixture
            .send_with(CACHEABLE, &[("authorization", "Bearer bob")])
            .await;
        assert!(fixture.upstream_requests() > calls);
        assert_eq!(bob.response.headers()[CACHE_CONTROL], "max-age=240, public");
    }

    #[tokio::test]
    async fn disabled_cache_always_executes() {
        let fixture = Fixture::new(Some(
            r#"
sources:
  posts:
    url: http://posts.mock/graphql
  comments:
    url: http://comments.mock/graphql
cache:
  enabled: false
"#,
        ))
        .await;
        fixture.send(CACHEABLE, None).await;
        let calls = fixture.upstream_requests();

        let response = fixture.send(CACHEABLE, None).await;
        assert!(fixture.upstream_requests() > calls);
        // the policy is still advertised
        assert_eq!(response.response.headers()[CACHE_CONTROL], "max-age=240, public");
    }
}
