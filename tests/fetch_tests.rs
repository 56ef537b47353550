//! Fetcher behavior against a mock origin.

use std::sync::Arc;
use std::time::Duration;

use skitter::fetch::FetchError;
use skitter::{Fetch, Fetcher, HttpClient};
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> Fetcher {
    Fetcher::new(Arc::new(HttpClient::new()))
        .backoff(Duration::from_nanos(1), Duration::from_millis(1))
}

#[tokio::test]
async fn test_retries_until_the_origin_recovers() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html></html>")
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;

    let url = Url::parse(&server.uri()).unwrap();
    let resp = fetcher()
        .max_attempts(5)
        .fetch(&CancellationToken::new(), &url)
        .await
        .unwrap();

    assert!(resp.is_some());
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let url = Url::parse(&server.uri()).unwrap();
    let err = fetcher()
        .max_attempts(2)
        .fetch(&CancellationToken::new(), &url)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::MaxAttempts { attempts: 2, .. }));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_dead_link_yields_no_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = Url::parse(&server.uri()).unwrap();
    let resp = fetcher()
        .fetch(&CancellationToken::new(), &url)
        .await
        .unwrap();

    assert!(resp.is_none());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_client_errors_are_fatal() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let url = Url::parse(&server.uri()).unwrap();
    let err = fetcher()
        .fetch(&CancellationToken::new(), &url)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Status { .. }));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_sends_identifying_headers() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let url = Url::parse(&server.uri()).unwrap();
    fetcher()
        .user_agent("testbot")
        .fetch(&CancellationToken::new(), &url)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];

    assert_eq!(request.headers.get("user-agent").unwrap(), "testbot");
    assert_eq!(
        request.headers.get("accept").unwrap(),
        "text/html; charset=UTF-8"
    );
}
