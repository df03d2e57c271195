use std::time::Duration;

use webfetch_service::{ChannelSubscriber, FetchError, Request, RequestKey, State, TimeUnit};

use crate::{HitCounter, next_update, setup_dispatcher, states, until_terminal, wait_for_state};

#[tokio::test]
async fn test_attach_after_finished() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    let server = HitCounter::new();

    let (s1, mut rx1) = ChannelSubscriber::channel();
    let key = dispatcher.submit(Request::get(server.url("text/done")), s1);
    until_terminal(&mut rx1).await;

    let (s2, mut rx2) = ChannelSubscriber::channel();
    dispatcher.attach(&key, s2.clone()).unwrap();
    // attaching twice is a no-op
    dispatcher.attach(&key, s2).unwrap();

    let update = rx2.try_recv().unwrap();
    assert_eq!(update.state, State::Finished);
    assert_eq!(update.response().unwrap().text(), "done");
    assert!(rx2.try_recv().is_err());
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_attach_unknown_request() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    let key = RequestKey::for_request(&Request::get("http://example.com/")).unwrap();
    let (subscriber, _rx) = ChannelSubscriber::channel();

    let error = dispatcher.attach(&key, subscriber).unwrap_err();
    assert_eq!(error.0, key);
}

#[tokio::test]
async fn test_detach_does_not_cancel() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    let server = HitCounter::new();
    let request = Request::get(server.url("delay/100ms/text/detached"));

    let (s1, mut rx1) = ChannelSubscriber::channel();
    let key = dispatcher.submit(request.clone(), s1.clone());
    assert_eq!(next_update(&mut rx1).await.state, State::Created);
    assert_eq!(dispatcher.detach(&s1), 1);

    wait_for_state(&dispatcher, &key, State::Finished).await;
    let seen: Vec<_> = std::iter::from_fn(|| rx1.try_recv().ok()).collect();
    assert!(seen.iter().all(|update| !update.state.is_terminal()));
    assert_eq!(dispatcher.response_string(&key).as_deref(), Some("detached"));

    let (s2, mut rx2) = ChannelSubscriber::channel();
    dispatcher.submit(request, s2);
    let update = rx2.try_recv().unwrap();
    assert!(update.response().unwrap().from_cache);
    assert_eq!(server.accesses(), 2);
}

#[tokio::test]
async fn test_unseen_result_is_joined() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    let server = HitCounter::new();
    // a zero validity skips the cache, so the only way to get the result is the record
    let request = Request::get(server.url("text/unseen")).cache_for(0, TimeUnit::Second);

    let (s1, _rx1) = ChannelSubscriber::channel();
    let key = dispatcher.submit(request.clone(), s1.clone());
    dispatcher.detach(&s1);
    wait_for_state(&dispatcher, &key, State::Finished).await;

    let (s2, mut rx2) = ChannelSubscriber::channel();
    dispatcher.submit(request, s2);
    let update = rx2.try_recv().unwrap();
    assert_eq!(update.state, State::Finished);
    assert!(!update.response().unwrap().from_cache);
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    let server = HitCounter::new();

    dispatcher.pause_all();
    let (s1, mut rx1) = ChannelSubscriber::channel();
    let key = dispatcher.submit(Request::get(server.url("text/paused")), s1);

    wait_for_state(&dispatcher, &key, State::Finished).await;
    assert!(rx1.try_recv().is_err());

    dispatcher.resume_all();
    let update = rx1.try_recv().unwrap();
    assert_eq!(update.state, State::Finished);
    assert_eq!(update.response().unwrap().text(), "paused");
    assert!(rx1.try_recv().is_err());

    dispatcher.resume_all();
    assert!(rx1.try_recv().is_err());
}

#[tokio::test]
async fn test_pause_mid_flight() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    let server = HitCounter::new();

    let (s1, mut rx1) = ChannelSubscriber::channel();
    let key = dispatcher.submit(Request::get(server.url("delay/100ms/text/mid")), s1);
    assert_eq!(next_update(&mut rx1).await.state, State::Created);
    dispatcher.pause_all();

    wait_for_state(&dispatcher, &key, State::Finished).await;
    // `Running` may or may not have made it before the pause
    let before: Vec<_> = std::iter::from_fn(|| rx1.try_recv().ok()).collect();
    assert!(states(&before).iter().all(|state| *state == State::Running));

    dispatcher.resume_all();
    assert_eq!(rx1.try_recv().unwrap().state, State::Finished);
    assert!(rx1.try_recv().is_err());
}

#[tokio::test]
async fn test_graceful_shutdown() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    let server = HitCounter::new();

    let (s1, mut rx1) = ChannelSubscriber::channel();
    dispatcher.submit(Request::get(server.url("delay/50ms/text/drained")), s1);

    assert!(dispatcher.shutdown().await);
    let updates = until_terminal(&mut rx1).await;
    assert_eq!(updates.last().unwrap().state, State::Finished);
}

#[tokio::test]
async fn test_forced_shutdown() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|config| {
        config.pool_size = 1;
        config.shutdown_timeout = Duration::from_millis(100);
    });
    let server = HitCounter::new();

    let (s1, mut rx1) = ChannelSubscriber::channel();
    let (s2, mut rx2) = ChannelSubscriber::channel();
    dispatcher.submit(Request::get(server.url("delay/10s/text/running")), s1);
    dispatcher.submit(Request::get(server.url("text/queued")), s2);

    assert_eq!(next_update(&mut rx1).await.state, State::Created);
    assert_eq!(next_update(&mut rx1).await.state, State::Running);

    assert!(!dispatcher.shutdown().await);

    let running = until_terminal(&mut rx1).await.pop().unwrap();
    assert_eq!(running.error(), Some(&FetchError::Cancelled));

    // the queued request never got a worker
    let queued = until_terminal(&mut rx2).await;
    assert_eq!(
        states(&queued),
        [State::Created, State::Running, State::Failed]
    );
    assert_eq!(queued[2].error(), Some(&FetchError::Cancelled));
}

#[tokio::test]
async fn test_invalid_request() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());

    let (s1, mut rx1) = ChannelSubscriber::channel();
    dispatcher.submit(Request::get("localhost/no-scheme"), s1);

    let update = rx1.try_recv().unwrap();
    assert_eq!(update.state, State::Failed);
    assert!(matches!(update.error(), Some(FetchError::InvalidRequest(_))));
    assert_eq!(dispatcher.outstanding(), 0);
}
