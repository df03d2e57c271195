use webfetch_service::{ChannelSubscriber, FetchError, Request, State, SubscriberRef};

use crate::{HitCounter, next_update, setup_dispatcher, states, until_terminal};

#[tokio::test]
async fn test_items_scenario() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    let server = HitCounter::new();
    let request = Request::get(server.url("items"));

    let (s1, mut rx1) = ChannelSubscriber::channel();
    let (s2, mut rx2) = ChannelSubscriber::channel();
    let key1 = dispatcher.submit(request.clone(), s1);
    let key2 = dispatcher.submit(request.clone(), s2);
    assert_eq!(key1, key2);

    for rx in [&mut rx1, &mut rx2] {
        let updates = until_terminal(rx).await;
        assert_eq!(
            states(&updates),
            [State::Created, State::Running, State::Finished]
        );
        let response = updates[2].response().unwrap();
        assert_eq!(response.status, Some(200));
        assert_eq!(response.content_type, "application/json");
        assert_eq!(response.text(), r#"["first","second","third"]"#);
        assert!(!response.from_cache);
    }
    assert_eq!(server.accesses(), 1);

    let (s3, mut rx3) = ChannelSubscriber::channel();
    dispatcher.submit(request, s3);

    // served synchronously from the cache
    let update = rx3.try_recv().unwrap();
    assert_eq!(update.state, State::Finished);
    assert!(update.response().unwrap().from_cache);
    assert_eq!(update.response().unwrap().text(), r#"["first","second","third"]"#);
    assert!(rx3.try_recv().is_err());
    assert_eq!(server.accesses(), 0);
}

#[tokio::test]
async fn test_concurrent_submits_share_one_request() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    let server = HitCounter::new();
    let url = server.url("delay/100ms/text/slow");

    let mut receivers = Vec::new();
    let mut tasks = Vec::new();
    for _ in 0..10 {
        let (subscriber, rx) = ChannelSubscriber::channel();
        receivers.push(rx);
        let dispatcher = dispatcher.clone();
        let request = Request::get(url.clone());
        tasks.push(tokio::spawn(async move {
            dispatcher.submit(request, subscriber)
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut outcomes = Vec::new();
    for rx in &mut receivers {
        let updates = until_terminal(rx).await;
        assert_eq!(updates.last().unwrap().state, State::Finished);
        outcomes.push(updates.last().unwrap().outcome.clone());
    }
    assert!(outcomes.windows(2).all(|pair| pair[0] == pair[1]));

    assert_eq!(
        server.all_hits(),
        [
            ("/delay/100ms/text/slow".to_owned(), 1),
            ("/text/slow".to_owned(), 1),
        ]
    );
}

#[tokio::test]
async fn test_failure_is_shared_and_not_sticky() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    // nothing listens on this port
    let request = Request::get("http://127.0.0.1:1/unreachable");

    let (s1, mut rx1) = ChannelSubscriber::channel();
    let (s2, mut rx2) = ChannelSubscriber::channel();
    dispatcher.submit(request.clone(), s1.clone());
    dispatcher.submit(request.clone(), s2);

    let failed1 = until_terminal(&mut rx1).await.pop().unwrap();
    let failed2 = until_terminal(&mut rx2).await.pop().unwrap();
    assert_eq!(failed1.state, State::Failed);
    assert!(matches!(failed1.error(), Some(FetchError::Transport(_))));
    assert_eq!(failed1.outcome, failed2.outcome);

    // a new submission starts over instead of reusing the failure
    dispatcher.submit(request, s1);
    assert_eq!(next_update(&mut rx1).await.state, State::Created);
    assert_eq!(until_terminal(&mut rx1).await.pop().unwrap().state, State::Failed);
}

#[tokio::test]
async fn test_subscriber_submitting_from_callback() {
    let (dispatcher, _cache_dir) = setup_dispatcher(|_| ());
    let server = HitCounter::new();
    let (inner, mut rx) = ChannelSubscriber::channel();

    let chained = {
        let dispatcher = dispatcher.clone();
        let next = Request::get(server.url("text/second"));
        SubscriberRef::new(move |update: &webfetch_service::Update| {
            if update.state == State::Finished {
                dispatcher.submit(next.clone(), inner.clone());
            }
        })
    };
    dispatcher.submit(Request::get(server.url("text/first")), chained);

    let updates = until_terminal(&mut rx).await;
    assert_eq!(updates.last().unwrap().response().unwrap().text(), "second");
    assert_eq!(server.accesses(), 2);
}
