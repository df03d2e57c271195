//! Runs requests through a [`Dispatcher`] and prints their results.
use std::io::Write;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde_json::json;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use webfetch_service::config::Config;
use webfetch_service::{Dispatcher, Outcome, Request, RequestKey, Subscriber, SubscriberRef, Update};

/// How results are printed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// The response body of every request, in order.
    Text,
    /// One JSON object per request and state change.
    Json,
}

/// Forwards the updates of one request, tagged with the position of the request.
#[derive(Debug)]
struct Forwarder {
    index: usize,
    sender: mpsc::UnboundedSender<(usize, Update)>,
}

impl Subscriber for Forwarder {
    fn on_update(&self, update: &Update) {
        let _ = self.sender.send((self.index, update.clone()));
    }
}

fn io_runtime() -> Result<Runtime> {
    let megs = 1024 * 1024;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("webfetch-io")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;
    Ok(runtime)
}

/// Fetches all requests, printing results once every request completed.
///
/// Fails if any of the requests failed.
pub fn fetch_all(config: &Config, requests: Vec<Request>, format: OutputFormat) -> Result<()> {
    let runtime = io_runtime().context("failed to start the I/O runtime")?;
    let dispatcher = Dispatcher::create(config, runtime.handle().clone())?;

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let urls: Vec<_> = requests.iter().map(|r| r.url.clone()).collect();
    for (index, request) in requests.into_iter().enumerate() {
        let subscriber = SubscriberRef::new(Forwarder {
            index,
            sender: sender.clone(),
        });
        dispatcher.submit(request, subscriber);
    }
    drop(sender);

    let mut results = vec![None; urls.len()];
    let mut stdout = std::io::stdout().lock();
    runtime.block_on(async {
        while let Some((index, update)) = receiver.recv().await {
            tracing::debug!(url = %urls[index], state = %update.state, "Request progressed");
            if format == OutputFormat::Json {
                writeln!(stdout, "{}", describe(&urls[index], &update))?;
            }
            if update.state.is_terminal() {
                results[index] = Some(update);
            }
            if results.iter().all(Option::is_some) {
                break;
            }
        }
        anyhow::Ok(())
    })?;
    runtime.block_on(dispatcher.shutdown());

    let mut failed = 0;
    for (url, result) in urls.iter().zip(results) {
        let Some(update) = result else {
            failed += 1;
            continue;
        };
        match update.outcome {
            Outcome::Response(response) => {
                if format == OutputFormat::Text {
                    stdout.write_all(&response.body)?;
                    writeln!(stdout)?;
                }
            }
            Outcome::Failed(error) => {
                failed += 1;
                tracing::error!(%url, %error, "Request failed");
            }
            Outcome::Pending => failed += 1,
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} requests failed", urls.len());
    }
    Ok(())
}

/// Prints the cached body of `request`.
pub fn show(config: &Config, request: Request) -> Result<()> {
    let runtime = io_runtime().context("failed to start the I/O runtime")?;
    let dispatcher = Dispatcher::create(config, runtime.handle().clone())?;

    let key = RequestKey::for_request(&request)?;
    let entry = dispatcher
        .cached(&key)
        .with_context(|| format!("no cached response for {}", request.url))?;

    tracing::info!(
        %key,
        correlation_id = %entry.metadata.correlation_id,
        mime_type = entry.metadata.mime_type,
        "Found cached response",
    );
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&entry.body)?;
    writeln!(stdout)?;
    Ok(())
}

/// Removes all cached responses.
pub fn clear_cache(config: &Config) -> Result<()> {
    let runtime = io_runtime().context("failed to start the I/O runtime")?;
    let dispatcher = Dispatcher::create(config, runtime.handle().clone())?;
    dispatcher.clear_cache()?;
    Ok(())
}

fn describe(url: &str, update: &Update) -> serde_json::Value {
    let mut value = json!({
        "url": url,
        "key": update.key.to_string(),
        "state": update.state.as_str(),
    });
    match &update.outcome {
        Outcome::Pending => {}
        Outcome::Response(response) => {
            value["status"] = json!(response.status);
            value["reason"] = json!(response.reason);
            value["content_type"] = json!(response.content_type);
            value["content_kind"] = json!(response.content_kind);
            value["from_cache"] = json!(response.from_cache);
            value["body"] = json!(response.text());
        }
        Outcome::Failed(error) => {
            value["error"] = json!(error.to_string());
        }
    }
    value
}
