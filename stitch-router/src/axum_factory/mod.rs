//! HTTP front-end of the stitched service, built with axum.
mod axum_http_server_factory;

pub(crate) use axum_http_server_factory::make_router;
