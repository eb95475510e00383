use std::io::Write;
use std::path::PathBuf;

use stitch_router::Configuration;
use stitch_router::error::ConfigurationError;

mod common;

use common::Gateway;
use common::upstreams;

#[test]
fn the_demo_configuration_is_valid() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("router.yaml");
    let configuration = Configuration::from_file(&path).unwrap();
    assert!(configuration.to_string().starts_with("2 source(s), 3 binding(s)"));
}

#[test]
fn a_gateway_without_sources_is_refused() {
    let error = "server:\n  listen: 127.0.0.1:0\n"
        .parse::<Configuration>()
        .unwrap_err();
    assert!(matches!(error, ConfigurationError::MissingSources));
}

#[test]
fn unknown_fields_are_refused() {
    let error = "sources:\n  posts:\n    url: http://localhost:4001\n    retries: 3\n"
        .parse::<Configuration>()
        .unwrap_err();
    assert!(error.to_string().contains("retries"));
}

#[test]
fn unset_variables_are_refused() {
    let error = "sources:\n  posts:\n    url: ${env.STITCH_ROUTER_TEST_UNSET_URL}\n"
        .parse::<Configuration>()
        .unwrap_err();
    assert!(matches!(
        error,
        ConfigurationError::CannotExpandVariable { .. }
    ));
}

#[tokio::test]
async fn sdl_files_replace_introspection() {
    let (posts, comments) = upstreams().await;
    let mut schema_file = tempfile::NamedTempFile::new().unwrap();
    schema_file
        .write_all(stitch_router::test_harness::COMMENTS_SCHEMA.as_bytes())
        .unwrap();
    let configuration: Configuration = format!(
        r#"
server:
  listen: 127.0.0.1:0
sources:
  posts:
    url: {}
  comments:
    url: {}
    schema_file: {}
"#,
        posts.uri(),
        comments.uri(),
        schema_file.path().display()
    )
    .parse()
    .unwrap();

    let gateway = Gateway::start_with(posts, comments, configuration).await;
    assert!(gateway.comments.source().requests().is_empty());

    let response = gateway.query(r#"{ Comment(id: "c2") { text } }"#).await;
    assert_eq!(response["data"]["Comment"]["text"], "Nice read");
    gateway.shutdown().await;
}

#[tokio::test]
async fn the_gateway_stops_gracefully() {
    let gateway = Gateway::start().await;
    let health = gateway.url("/health");
    gateway.shutdown().await;

    assert!(reqwest::get(health).await.is_err());
}
