//! Axum http server factory. Axum provides routing capability on top of Hyper HTTP.
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::body::Bytes;
use axum::extract::OriginalUri;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use http::HeaderValue;
use http::Method;
use http::Request;
use http::header::ACCEPT;
use http::header::CONTENT_TYPE;
use serde_json::json;
use tower::ServiceExt;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::configuration::ConfigurationError;
use crate::graphql;
use crate::services::SupergraphRequest;
use crate::services::StitchedServiceFactory;
use crate::services::new_service::ServiceFactory;

const PLAYGROUND_PAGE: &str = include_str!("../../templates/playground_index.html");

/// Builds the HTTP front-end: the GraphQL endpoint, the playground and the health check.
pub(crate) fn make_router(
    service_factory: Arc<StitchedServiceFactory>,
) -> Result<Router, ConfigurationError> {
    let configuration = service_factory.configuration().clone();
    let server = &configuration.server;
    let cors = configuration.cors.clone().into_layer().map_err(|error| {
        ConfigurationError::InvalidConfiguration {
            message: "invalid cors configuration",
            error,
        }
    })?;

    let playground = server
        .playground
        .enabled
        .then(|| Html(PLAYGROUND_PAGE.replace("{{GRAPHQL_ENDPOINT}}", &server.graphql_path)));

    let graphql_route = get({
        let playground = playground.clone();
        move |state: State<Arc<StitchedServiceFactory>>, http_request: Request<Body>| {
            handle_get(state, http_request, playground)
        }
    })
    .post(handle_post);

    let mut router = Router::new().route(&server.graphql_path, graphql_route);
    if let Some(playground) = playground {
        router = router.route(
            &server.playground.path,
            get(move || async move { playground }),
        );
    }
    if server.health_check.enabled {
        router = router.route(&server.health_check.path, get(health_check));
    }

    Ok(router
        .with_state(service_factory)
        .layer(
            TraceLayer::new_for_http().on_response(
                |response: &Response, duration: Duration, _span: &Span| {
                    tracing::debug!(
                        status = response.status().as_u16(),
                        latency_ms = duration.as_millis() as u64,
                        "response sent"
                    );
                },
            ),
        )
        .layer(cors)
        .layer(CompressionLayer::new()))
}

async fn handle_get(
    State(service_factory): State<Arc<StitchedServiceFactory>>,
    http_request: Request<Body>,
    playground: Option<Html<String>>,
) -> Response {
    let query = http_request.uri().query().map(str::to_string);
    if query.is_none() {
        let prefers_html = http_request
            .headers()
            .get(ACCEPT)
            .map(prefers_html)
            .unwrap_or_default();
        if let (true, Some(playground)) = (prefers_html, playground) {
            return playground.into_response();
        }
    }

    let request = match query {
        Some(query) => match graphql::Request::from_urlencoded_query(query) {
            Ok(request) => request,
            Err(error) => return invalid_request(error),
        },
        None => graphql::Request::default(),
    };
    let (parts, _) = http_request.into_parts();
    run_graphql_request(
        &service_factory,
        Request::from_parts(parts, request),
    )
    .await
}

async fn handle_post(
    State(service_factory): State<Arc<StitchedServiceFactory>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request: graphql::Request = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(error) => return invalid_request(error),
    };
    let mut http_request = Request::new(request);
    *http_request.method_mut() = Method::POST;
    *http_request.uri_mut() = uri;
    *http_request.headers_mut() = headers;

    run_graphql_request(&service_factory, http_request).await
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "UP" }))
}

fn invalid_request(error: serde_json::Error) -> Response {
    tracing::debug!(%error, "invalid GraphQL request");
    let response = graphql::Response::from_errors(vec![
        graphql::Error::builder()
            .message(format!("Invalid GraphQL request: {error}"))
            .extension_code("INVALID_GRAPHQL_REQUEST")
            .build(),
    ]);
    (StatusCode::BAD_REQUEST, Json(response)).into_response()
}

async fn run_graphql_request(
    service_factory: &StitchedServiceFactory,
    http_request: Request<graphql::Request>,
) -> Response {
    let service = service_factory.create();
    match service.oneshot(SupergraphRequest::from(http_request)).await {
        Ok(response) => {
            let (mut parts, body) = response.response.into_parts();
            match serde_json::to_vec(&body) {
                Ok(bytes) => {
                    parts
                        .headers
                        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                    Response::from_parts(parts, Body::from(bytes))
                }
                Err(error) => {
                    tracing::error!(%error, "could not serialize the response");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "could not serialize the response",
                    )
                        .into_response()
                }
            }
        }
        Err(error) => {
            tracing::error!(%error, "stitched service call failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "stitched service call failed",
            )
                .into_response()
        }
    }
}

fn prefers_html(accept_header: &HeaderValue) -> bool {
    accept_header
        .to_str()
        .map(|accept_str| {
            accept_str
                .split(',')
                .map(|a| a.trim())
                .any(|a| a == "text/html")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
    use http::header::ORIGIN;
    use pretty_assertions::assert_eq;
    use test_log::test;

    use super::*;
    use crate::configuration::Configuration;
    use crate::test_harness::MockSource;
    use crate::test_harness::TestHarness;

    async fn router(configuration: Option<&str>) -> Router {
        let mut harness = TestHarness::canned(
            Arc::new(MockSource::canned_posts().unwrap()),
            Arc::new(MockSource::canned_comments().unwrap()),
        );
        if let Some(configuration) = configuration {
            let configuration: Configuration = configuration.parse().unwrap();
            harness = harness.with_configuration(configuration);
        }
        harness.build_router().await.unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(body: &str) -> Request<Body> {
        Request::post("/graphql")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test(tokio::test)]
    async fn it_answers_post_requests() {
        let response = router(None)
            .await
            .oneshot(post(r#"{"query": "{ Post(id: \"p1\") { title } }"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(
            body_json(response).await,
            json!({"data": {"Post": {"title": "Stitching schemas"}}})
        );
    }

    #[test(tokio::test)]
    async fn it_extracts_query_and_operation_name_on_get_requests() {
        let request = Request::get(
            "/graphql?query=query%20A%20%7B%20allPosts%20%7B%20id%20%7D%20%7D%20query%20B%20%7B%20allComments%20%7B%20id%20%7D%20%7D&operationName=B",
        )
        .body(Body::empty())
        .unwrap();
        let response = router(None).await.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"data": {"allComments": [{"id": "c1"}, {"id": "c2"}, {"id": "c3"}]}})
        );
    }

    #[test(tokio::test)]
    async fn malformed_request() {
        let response = router(None)
            .await
            .oneshot(post("{not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["errors"][0]["extensions"]["code"], "INVALID_GRAPHQL_REQUEST");
    }

    #[test(tokio::test)]
    async fn missing_query_is_a_bad_request() {
        let request = Request::get("/graphql").body(Body::empty()).unwrap();
        let response = router(None).await.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["errors"][0]["extensions"]["code"], "MISSING_QUERY_STRING");
    }

    #[test(tokio::test)]
    async fn it_displays_the_playground() {
        let router = router(None).await;
        let response = router
            .clone()
            .oneshot(Request::get("/playground").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let page = String::from_utf8_lossy(&page);
        assert!(page.contains(r#"url: "/graphql""#));

        // browsers landing on the endpoint get the page too
        let response = router
            .oneshot(
                Request::get("/graphql")
                    .header(ACCEPT, "text/html,application/xhtml+xml")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/html")
        );
    }

    #[test(tokio::test)]
    async fn it_doesnt_display_disabled_playground() {
        let router = router(Some(
            r#"
sources:
  posts:
    url: http://posts.mock/graphql
  comments:
    url: http://comments.mock/graphql
server:
  graphql_path: /api
  playground:
    enabled: false
"#,
        ))
        .await;
        let response = router
            .clone()
            .oneshot(Request::get("/playground").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router
            .oneshot(
                Request::post("/api")
                    .body(Body::from(r#"{"query": "{ allPosts { id } }"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test(tokio::test)]
    async fn health_check_is_up() {
        let response = router(None)
            .await
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "UP"}));
    }

    fn post_with_origin(origin: &str) -> Request<Body> {
        Request::post("/graphql")
            .header(ORIGIN, origin)
            .body(Body::from(r#"{"query": "{ allPosts { id } }"}"#))
            .unwrap()
    }

    #[test(tokio::test)]
    async fn cors_allow_any_origin() {
        let response = router(None)
            .await
            .oneshot(post_with_origin("https://blog.example"))
            .await
            .unwrap();
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[test(tokio::test)]
    async fn cors_origin_list() {
        let router = router(Some(
            r#"
sources:
  posts:
    url: http://posts.mock/graphql
  comments:
    url: http://comments.mock/graphql
cors:
  allow_any_origin: false
  origins: [https://blog.example]
"#,
        ))
        .await;

        let response = router
            .clone()
            .oneshot(post_with_origin("https://blog.example"))
            .await
            .unwrap();
        assert_eq!(
            response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://blog.example"
        );

        let response = router
            .oneshot(post_with_origin("https://evil.example"))
            .await
            .unwrap();
        assert!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }
}
