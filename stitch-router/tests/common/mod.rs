//! A gateway started over HTTP in front of two mock upstream sources.
#![allow(dead_code)]

use std::net::SocketAddr;

use serde_json::Value;
use serde_json::json;
use stitch_router::Configuration;
use stitch_router::RouterHttpServer;
use stitch_router::ShutdownSource;
use stitch_router::test_harness::MockSource;
use stitch_router::test_harness::MockUpstream;
use stitch_router::test_harness::canned_configuration;

pub struct Gateway {
    pub posts: MockUpstream,
    pub comments: MockUpstream,
    server: RouterHttpServer,
    address: SocketAddr,
    client: reqwest::Client,
}

pub async fn upstreams() -> (MockUpstream, MockUpstream) {
    (
        MockUpstream::start(MockSource::canned_posts().unwrap()).await,
        MockUpstream::start(MockSource::canned_comments().unwrap()).await,
    )
}

impl Gateway {
    /// The demo gateway over canned posts and comments.
    pub async fn start() -> Self {
        let (posts, comments) = upstreams().await;
        let configuration = canned_configuration(&posts.uri(), &comments.uri()).unwrap();
        Self::start_with(posts, comments, configuration).await
    }

    pub async fn start_with(
        posts: MockUpstream,
        comments: MockUpstream,
        configuration: Configuration,
    ) -> Self {
        let server = RouterHttpServer::builder()
            .configuration(configuration)
            .shutdown(ShutdownSource::None)
            .start();
        let address = server
            .listen_address()
            .await
            .expect("the gateway failed to start");
        Self {
            posts,
            comments,
            server,
            address,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub async fn post(&self, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/graphql"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    /// Posts a query and returns the JSON body.
    pub async fn query(&self, query: &str) -> Value {
        let response = self.post(json!({ "query": query })).await;
        response.json().await.unwrap()
    }

    pub async fn shutdown(mut self) {
        self.server.shutdown().await.unwrap();
    }
}

/// Requests a source received, without the introspection made at startup.
pub fn forwarded(upstream: &MockUpstream) -> usize {
    upstream
        .source()
        .requests()
        .iter()
        .filter(|request| {
            !request
                .query
                .as_deref()
                .is_some_and(|query| query.contains("__schema"))
        })
        .count()
}
