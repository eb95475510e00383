//! Network links carrying GraphQL operations to an upstream source.

use std::fmt;

use async_trait::async_trait;
use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use http::header::ACCEPT;
use http::header::CONTENT_TYPE;
use tracing::Instrument;
use url::Url;

use crate::configuration::ConfigurationError;
use crate::configuration::Source;
use crate::context::Context;
use crate::error::FetchError;
use crate::graphql;

const APPLICATION_JSON: &str = "application/json";
const GRAPHQL_RESPONSE_JSON: &str = "application/graphql-response+json, application/json";

/// Sends one GraphQL operation to an upstream source and decodes its response.
///
/// Timeouts are the link's responsibility. Links never retry.
#[async_trait]
pub trait Link: Send + Sync + fmt::Debug {
    async fn execute(
        &self,
        request: graphql::Request,
        context: &Context,
    ) -> Result<graphql::Response, FetchError>;
}

/// GraphQL over HTTP: `POST` with a JSON body.
pub(crate) struct HttpLink {
    service: String,
    url: Url,
    client: reqwest::Client,
    headers: HeaderMap,
}

impl fmt::Debug for HttpLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpLink")
            .field("service", &self.service)
            .field("url", &self.url.as_str())
            .finish()
    }
}

impl HttpLink {
    pub(crate) fn new(name: &str, source: &Source) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidSource {
            name: name.to_string(),
            reason,
        };
        let url = source.url(name)?;
        let mut headers = HeaderMap::new();
        for (header_name, value) in &source.headers {
            headers.insert(
                HeaderName::try_from(header_name.as_str())
                    .map_err(|e| invalid(format!("invalid header name '{header_name}': {e}")))?,
                HeaderValue::try_from(value.as_str())
                    .map_err(|e| invalid(format!("invalid value for header '{header_name}': {e}")))?,
            );
        }
        let client = reqwest::Client::builder()
            .timeout(source.timeout)
            .build()
            .map_err(|e| invalid(format!("cannot build the http client: {e}")))?;

        Ok(Self {
            service: name.to_string(),
            url,
            client,
            headers,
        })
    }

    fn http_error(&self, status_code: Option<u16>, reason: String) -> FetchError {
        FetchError::SubrequestHttpError {
            status_code,
            service: self.service.clone(),
            reason,
        }
    }
}

#[async_trait]
impl Link for HttpLink {
    async fn execute(
        &self,
        request: graphql::Request,
        context: &Context,
    ) -> Result<graphql::Response, FetchError> {
        let body = serde_json::to_vec(&request).map_err(|e| FetchError::MalformedRequest {
            reason: e.to_string(),
        })?;

        let mut headers = context.propagated_headers();
        // Static source headers win over propagated ones.
        headers.extend(self.headers.clone());
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        headers.insert(ACCEPT, HeaderValue::from_static(GRAPHQL_RESPONSE_JSON));

        context.count_upstream_call();
        let span = tracing::info_span!(
            "fetch",
            "service.name" = %self.service,
            "otel.kind" = "CLIENT",
            "http.status" = tracing::field::Empty,
        );
        async {
            let response = self
                .client
                .post(self.url.clone())
                .headers(headers)
                .body(body)
                .send()
                .await
                .map_err(|e| self.http_error(e.status().map(|s| s.as_u16()), e.to_string()))?;

            let status = response.status();
            tracing::Span::current().record("http.status", status.as_u16());
            if !status.is_success() {
                return Err(self.http_error(
                    Some(status.as_u16()),
                    status
                        .canonical_reason()
                        .unwrap_or("unexpected status")
                        .to_string(),
                ));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| self.http_error(Some(status.as_u16()), e.to_string()))?;
            let response =
                graphql::Response::from_bytes(&self.service, bytes).map_err(|error| {
                    failfast_error!(%error, "source returned a malformed response");
                    error
                })?;
            if !response.errors.is_empty() {
                tracing::debug!(errors = response.errors.len(), "source returned errors");
            }
            Ok(response)
        }
        .instrument(span)
        .await
    }
}
