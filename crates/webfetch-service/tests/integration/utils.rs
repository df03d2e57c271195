use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use webfetch_service::config::Config;
use webfetch_service::{Dispatcher, RequestKey, State, Update};
use webfetch_test as test;

pub use test::{HitCounter, TempDir};

/// Setup tests and create a test dispatcher.
///
/// This function returns a tuple containing the dispatcher to test, and a temporary cache
/// directory. The directory is cleaned up when the [`TempDir`] instance is dropped. Keep it as
/// guard until the test has finished.
///
/// The `update_config` closure can modify any default configuration if needed before the
/// dispatcher is created.
pub fn setup_dispatcher(update_config: impl FnOnce(&mut Config)) -> (Dispatcher, TempDir) {
    test::setup();

    let cache_dir = test::tempdir();

    let mut config = Config {
        cache_dir: Some(cache_dir.path().to_owned()),
        ..Default::default()
    };
    update_config(&mut config);

    let dispatcher = create_dispatcher(&config);
    (dispatcher, cache_dir)
}

/// Creates another dispatcher for the given configuration.
pub fn create_dispatcher(config: &Config) -> Dispatcher {
    let handle = tokio::runtime::Handle::current();
    Dispatcher::create(config, handle).unwrap()
}

/// Receives the next update, failing the test if none arrives in time.
pub async fn next_update(rx: &mut UnboundedReceiver<Update>) -> Update {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for an update")
        .expect("subscriber channel closed")
}

/// Receives updates up to and including the first terminal one.
pub async fn until_terminal(rx: &mut UnboundedReceiver<Update>) -> Vec<Update> {
    let mut updates = Vec::new();
    loop {
        let update = next_update(rx).await;
        let done = update.state.is_terminal();
        updates.push(update);
        if done {
            return updates;
        }
    }
}

pub fn states(updates: &[Update]) -> Vec<State> {
    updates.iter().map(|update| update.state).collect()
}

/// Waits until the request for `key` reached `state`, without being subscribed to it.
pub async fn wait_for_state(dispatcher: &Dispatcher, key: &RequestKey, state: State) {
    let poll = async {
        while dispatcher.state(key) != Some(state) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), poll)
        .await
        .expect("timed out waiting for the request");
}
