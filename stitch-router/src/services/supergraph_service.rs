//! Stitched service: runs client operations against the merged schema.

use std::sync::Arc;
use std::task::Poll;

use futures::TryFutureExt;
use futures::future::BoxFuture;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use http::header::ALLOW;
use tower::BoxError;
use tower::Service;
use tower::ServiceBuilder;
use tower::ServiceExt;
use tracing::Instrument;

use super::layers::response_cache::ResponseCacheLayer;
use super::new_service::ServiceFactory;
use super::supergraph;
use super::SupergraphRequest;
use super::SupergraphResponse;
use crate::cache::CacheControl;
use crate::cache::ResponseCache;
use crate::configuration::Configuration;
use crate::execution;
use crate::execution::ExecutionOptions;
use crate::execution::Rejection;
use crate::graphql;
use crate::graphql::Error;
use crate::stitching::MergedSchema;
use crate::stitching::OperationKind;

/// Executes requests against the stitched schema.
#[derive(Clone)]
pub(crate) struct StitchedService {
    schema: Arc<MergedSchema>,
    options: ExecutionOptions,
    propagate_headers: Arc<Vec<String>>,
}

impl Service<SupergraphRequest> for StitchedService {
    type Response = SupergraphResponse;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: SupergraphRequest) -> Self::Future {
        let schema = self.schema.clone();
        let options = self.options;
        let propagate_headers = self.propagate_headers.clone();
        let context_cloned = req.context.clone();

        let fut = service_call(schema, options, propagate_headers, req).or_else(
            |error: BoxError| async move {
                tracing::error!(%error, "stitched service failed");
                let errors = vec![
                    Error::builder()
                        .message(error.to_string())
                        .extension_code("INTERNAL_SERVER_ERROR")
                        .build(),
                ];
                Ok(SupergraphResponse::with_status(
                    graphql::Response::from_errors(errors),
                    StatusCode::INTERNAL_SERVER_ERROR,
                    context_cloned,
                ))
            },
        );

        Box::pin(fut)
    }
}

async fn service_call(
    schema: Arc<MergedSchema>,
    options: ExecutionOptions,
    propagate_headers: Arc<Vec<String>>,
    req: SupergraphRequest,
) -> Result<SupergraphResponse, BoxError> {
    let SupergraphRequest {
        supergraph_request,
        context,
    } = req;
    context.capture_headers(supergraph_request.headers(), &propagate_headers)?;
    let is_get = supergraph_request.method() == Method::GET;
    let request = supergraph_request.into_body();

    let prepared = match execution::prepare(&schema, &request, &options) {
        Ok(prepared) => prepared,
        Err(Rejection { status, response }) => {
            tracing::debug!(%status, errors = response.errors.len(), "request rejected");
            return Ok(SupergraphResponse::with_status(response, status, context));
        }
    };

    if is_get && prepared.kind() == OperationKind::Mutation {
        let errors = vec![
            Error::builder()
                .message("Mutations can only be sent over HTTP POST")
                .extension_code("MUTATION_FORBIDDEN")
                .build(),
        ];
        let mut response = SupergraphResponse::with_status(
            graphql::Response::from_errors(errors),
            StatusCode::METHOD_NOT_ALLOWED,
            context,
        );
        response
            .response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("POST"));
        return Ok(response);
    }

    let span = tracing::info_span!(
        "execute",
        operation.name = prepared.name().unwrap_or_default(),
        operation.kind = prepared.kind().keyword(),
    );
    let (response, policy) = execution::execute(&schema, &prepared, &context, &options)
        .instrument(span)
        .await;
    tracing::debug!(
        upstream_calls = context.upstream_calls(),
        errors = response.errors.len(),
        max_age = policy.max_age(),
        "request executed"
    );

    let mut headers = HeaderMap::new();
    if prepared.kind() == OperationKind::Query && response.errors.is_empty() && policy.is_cacheable()
    {
        CacheControl::from_policy(&policy).to_headers(&mut headers)?;
    }
    let mut response = SupergraphResponse::new_from_graphql_response(response, context);
    response.response.headers_mut().extend(headers);
    Ok(response)
}

/// Builds a [`StitchedService`] per request, wrapped in the response cache when enabled.
#[derive(Clone)]
pub struct StitchedServiceFactory {
    schema: Arc<MergedSchema>,
    configuration: Arc<Configuration>,
    cache: Option<Arc<ResponseCache>>,
    options: ExecutionOptions,
}

impl StitchedServiceFactory {
    pub(crate) fn new(schema: Arc<MergedSchema>, configuration: Arc<Configuration>) -> Self {
        let cache_configuration = &configuration.cache;
        let options = ExecutionOptions {
            introspection: configuration.stitching.introspection,
            default_max_age: u32::try_from(cache_configuration.default_max_age.as_secs())
                .unwrap_or(u32::MAX),
            expose_hints: cache_configuration.expose_hints,
        };
        let cache = cache_configuration
            .enabled
            .then(|| Arc::new(ResponseCache::new(cache_configuration.capacity.as_u64())));
        Self {
            schema,
            configuration,
            cache,
            options,
        }
    }

    pub(crate) fn schema(&self) -> &Arc<MergedSchema> {
        &self.schema
    }

    pub(crate) fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }
}

impl ServiceFactory<SupergraphRequest> for StitchedServiceFactory {
    type Service = supergraph::BoxService;

    fn create(&self) -> Self::Service {
        let propagate_headers = Arc::new(self.configuration.headers.propagate.clone());
        let service = StitchedService {
            schema: self.schema.clone(),
            options: self.options,
            propagate_headers: propagate_headers.clone(),
        };
        ServiceBuilder::new()
            .option_layer(
                self.cache
                    .clone()
                    .map(|cache| ResponseCacheLayer::new(cache, propagate_headers)),
            )
            .service(service)
            .boxed()
    }
}
