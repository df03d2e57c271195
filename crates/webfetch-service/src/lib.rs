#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod dispatch;
pub mod executor;
pub mod pool;
pub mod service;
pub mod transport;
pub mod types;
pub mod utils;

pub use caching::RequestKey;
pub use dispatch::{
    ChannelSubscriber, Outcome, ResponseInfo, State, Subscriber, SubscriberRef, Update,
};
pub use service::Dispatcher;
pub use types::{CacheDuration, ContentKind, FetchError, Method, Request, TimeUnit};
