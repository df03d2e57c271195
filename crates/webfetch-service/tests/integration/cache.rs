use std::time::Duration;

use webfetch_service::{ChannelSubscriber, Request, State, TimeUnit};

use crate::{HitCounter, create_dispatcher, setup_dispatcher, until_terminal};

#[tokio::test]
async fn test_cache_survives_restart() {
    let (dispatcher, cache_dir) = setup_dispatcher(|_| ());
    let server = HitCounter::new();
    let request = Request::get(server.url("text/persisted")).cache_for(1, TimeUnit::Day);

    let (s1, mut rx1) = ChannelSubscriber::channel();
    let key = dispatcher.submit(request.clone(), s1);
    until_terminal(&mut rx1).await;
    assert!(dispatcher.shutdown().await);
    assert_eq!(server.accesses(), 1);

    let config = webfetch_service::config::Config {
        cache_dir: Some(cache_dir.path().to_owned()),
        ..Default::default()
    };
    let restarted = create_dispatcher(&config);
    assert_eq!(restarted.response_string(&key).as_deref(), Some("persisted"));

    let (s2, mut rx2) = ChannelSubscriber::channel();
    restarted.submit(request, s2);
    let update = rx2.try_recv().unwrap();
    assert_eq!(update.state, State::Finished);
    let response = update.response().unwrap();
    assert!(response.from_cache);
    assert_eq!(response.content_type, "text/plain; charset=utf-8");
    assert_eq!(server.accesses(), 0);
}

#[tokio::test]
async fn test_expired_entry_is_refetched() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    let server = HitCounter::new();
    let request = Request::get(server.url("text/expiring")).cache_for(1, TimeUnit::Second);

    for _ in 0..2 {
        let (subscriber, mut rx) = ChannelSubscriber::channel();
        dispatcher.submit(request.clone(), subscriber);
        let update = until_terminal(&mut rx).await.pop().unwrap();
        assert!(!update.response().unwrap().from_cache);
        tokio::time::sleep(Duration::from_millis(1100)).await;
    }
    assert_eq!(server.accesses(), 2);
}

#[tokio::test]
async fn test_long_cache() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|config| config.long_cache = true);
    let server = HitCounter::new();
    let request = Request::get(server.url("text/forever")).cache_for(0, TimeUnit::Second);

    let (s1, mut rx1) = ChannelSubscriber::channel();
    dispatcher.submit(request.clone(), s1);
    until_terminal(&mut rx1).await;

    let (s2, mut rx2) = ChannelSubscriber::channel();
    dispatcher.submit(request, s2);
    assert!(rx2.try_recv().unwrap().response().unwrap().from_cache);
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_clear_cache() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    let server = HitCounter::new();
    let request = Request::get(server.url("text/cleared"));

    let (s1, mut rx1) = ChannelSubscriber::channel();
    let key = dispatcher.submit(request.clone(), s1);
    until_terminal(&mut rx1).await;
    assert!(dispatcher.cached(&key).is_some());

    dispatcher.clear_cache().unwrap();
    assert!(dispatcher.cached(&key).is_none());

    let (s2, mut rx2) = ChannelSubscriber::channel();
    dispatcher.submit(request, s2);
    let update = until_terminal(&mut rx2).await.pop().unwrap();
    assert!(!update.response().unwrap().from_cache);
    assert_eq!(server.accesses(), 2);
}
