use webfetch_service::{ChannelSubscriber, ContentKind, Method, Request, ResponseInfo};

use crate::{HitCounter, setup_dispatcher, until_terminal};

async fn fetch(dispatcher: &webfetch_service::Dispatcher, request: Request) -> ResponseInfo {
    let (subscriber, mut rx) = ChannelSubscriber::channel();
    dispatcher.submit(request, subscriber);
    let update = until_terminal(&mut rx).await.pop().unwrap();
    update
        .response()
        .unwrap_or_else(|| panic!("request failed: {:?}", update.outcome))
        .clone()
}

#[tokio::test]
async fn test_gzip_is_inflated() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    let server = HitCounter::new();

    let response = fetch(&dispatcher, Request::get(server.url("gzip/compressed"))).await;

    assert_eq!(response.body, "compressed");
    assert_eq!(response.content_type, "text/plain");
    assert_eq!(response.content_kind, ContentKind::Text);
}

#[tokio::test]
async fn test_content_kind_without_content_type() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    let server = HitCounter::new();

    let response = fetch(&dispatcher, Request::get(server.url("raw/bytes"))).await;
    assert_eq!(response.body, "bytes");
    assert_eq!(response.content_type, "");
    assert_eq!(response.content_kind, ContentKind::Raw);

    let request = Request::get(server.url("raw/forced")).content_kind(ContentKind::Text);
    let response = fetch(&dispatcher, request).await;
    assert_eq!(response.content_kind, ContentKind::Text);
}

#[tokio::test]
async fn test_error_status_is_a_response() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    let server = HitCounter::new();

    let response = fetch(
        &dispatcher,
        Request::get(server.url("respond_statuscode/404/missing")),
    )
    .await;

    assert_eq!(response.status, Some(404));
    assert_eq!(response.reason.as_deref(), Some("Not Found"));
}

#[tokio::test]
async fn test_parameter_encoding() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    let server = HitCounter::new();

    let get = Request::get(server.url("echo")).param("q", "a b");
    assert_eq!(
        fetch(&dispatcher, get).await.text(),
        "method: GET\nquery: q=a+b\ncontent-type: \nbody: \n"
    );

    let post = Request::post(server.url("echo")).param("a", "1").param("b", "2");
    assert_eq!(
        fetch(&dispatcher, post).await.text(),
        "method: POST\nquery: \ncontent-type: application/x-www-form-urlencoded\nbody: a=1&b=2\n"
    );

    let delete = Request::new(Method::Delete, server.url("echo"))
        .param("id", "7")
        .header("X-Variant", "delete");
    assert_eq!(
        fetch(&dispatcher, delete).await.text(),
        "method: DELETE\nquery: id=7\ncontent-type: \nbody: \n"
    );
}

#[tokio::test]
async fn test_fake_data_skips_network() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    let server = HitCounter::new();

    let request = Request::get(server.url("text/real")).fake_data("canned");
    let response = fetch(&dispatcher, request).await;

    assert_eq!(response.status, Some(200));
    assert_eq!(response.reason.as_deref(), Some("OK"));
    assert_eq!(response.body, "canned");
    assert_eq!(response.content_kind, ContentKind::Text);
    assert_eq!(server.accesses(), 0);
}
