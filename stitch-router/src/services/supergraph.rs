#![allow(missing_docs)]

use std::collections::HashMap;

use http::HeaderName;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use http::Uri;
use serde_json_bytes::ByteString;
use tower::BoxError;

use crate::context::Context;
use crate::graphql;
use crate::graphql::Error;
use crate::json_ext::Object;
use crate::json_ext::Value;

pub type BoxService = tower::util::BoxService<Request, Response, BoxError>;
pub type BoxCloneService = tower::util::BoxCloneService<Request, Response, BoxError>;
pub type ServiceResult = Result<Response, BoxError>;

/// A client request to the stitched schema.
///
/// This consists of the parsed GraphQL request, the HTTP head it came with and the context
/// shared by every upstream call made to answer it.
pub struct Request {
    /// Original request to the router.
    pub supergraph_request: http::Request<graphql::Request>,

    /// Context for the upstream calls.
    pub context: Context,
}

impl From<http::Request<graphql::Request>> for Request {
    fn from(supergraph_request: http::Request<graphql::Request>) -> Self {
        Self {
            supergraph_request,
            context: Context::new(),
        }
    }
}

fn header_map(headers: HashMap<String, String>) -> Result<http::HeaderMap, BoxError> {
    headers
        .into_iter()
        .map(|(name, value)| Ok((HeaderName::try_from(name)?, HeaderValue::try_from(value)?)))
        .collect()
}

#[buildstructor::buildstructor]
impl Request {
    /// This is the constructor (or builder) to use when constructing a real Request.
    #[builder(visibility = "pub")]
    fn new(
        query: Option<String>,
        operation_name: Option<String>,
        variables: HashMap<String, Value>,
        context: Context,
        headers: HashMap<String, String>,
        uri: Uri,
        method: Method,
    ) -> Result<Request, BoxError> {
        let variables: Object = variables
            .into_iter()
            .map(|(name, value)| (ByteString::from(name), value))
            .collect();
        let gql_request = graphql::Request::builder()
            .and_query(query)
            .and_operation_name(operation_name)
            .variables(variables)
            .build();

        let mut supergraph_request = http::Request::builder()
            .uri(uri)
            .method(method)
            .body(gql_request)?;
        *supergraph_request.headers_mut() = header_map(headers)?;

        Ok(Self {
            supergraph_request,
            context,
        })
    }

    /// This is the constructor (or builder) to use when constructing a "fake" Request.
    ///
    /// The method defaults to POST and the URI to a placeholder.
    #[builder(visibility = "pub")]
    fn fake_new(
        query: Option<String>,
        operation_name: Option<String>,
        variables: HashMap<String, Value>,
        context: Option<Context>,
        headers: HashMap<String, String>,
        method: Option<Method>,
    ) -> Result<Request, BoxError> {
        Request::new(
            query,
            operation_name,
            variables,
            context.unwrap_or_default(),
            headers,
            Uri::from_static("http://default"),
            method.unwrap_or(Method::POST),
        )
    }
}

/// The GraphQL response, its HTTP head and the request [`Context`].
pub struct Response {
    pub response: http::Response<graphql::Response>,
    pub context: Context,
}

#[buildstructor::buildstructor]
impl Response {
    /// This is the constructor (or builder) to use when constructing a real Response.
    #[builder(visibility = "pub")]
    fn new(
        data: Option<Value>,
        errors: Vec<Error>,
        extensions: HashMap<String, Value>,
        status_code: Option<StatusCode>,
        headers: HashMap<String, String>,
        context: Context,
    ) -> Result<Self, BoxError> {
        let extensions: Object = extensions
            .into_iter()
            .map(|(name, value)| (ByteString::from(name), value))
            .collect();
        let response = graphql::Response::builder()
            .and_data(data)
            .errors(errors)
            .extensions(extensions)
            .build();

        let mut http_response = http::Response::builder()
            .status(status_code.unwrap_or(StatusCode::OK))
            .body(response)?;
        *http_response.headers_mut() = header_map(headers)?;

        Ok(Self {
            response: http_response,
            context,
        })
    }

    /// This is the constructor (or builder) to use when constructing a Response that represents
    /// a request error. It has no response data.
    #[builder(visibility = "pub")]
    fn error_new(
        errors: Vec<Error>,
        status_code: Option<StatusCode>,
        headers: HashMap<String, String>,
        context: Context,
    ) -> Result<Self, BoxError> {
        Response::new(
            None,
            errors,
            Default::default(),
            status_code,
            headers,
            context,
        )
    }

    pub fn new_from_graphql_response(response: graphql::Response, context: Context) -> Self {
        Self {
            response: http::Response::new(response),
            context,
        }
    }

    /// Same as [`Response::new_from_graphql_response`], with another status code.
    pub(crate) fn with_status(
        response: graphql::Response,
        status: StatusCode,
        context: Context,
    ) -> Self {
        let mut response = Self::new_from_graphql_response(response, context);
        *response.response.status_mut() = status;
        response
    }
}
