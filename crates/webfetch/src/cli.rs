//! Exposes the command line application.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use webfetch_service::config::Config;
use webfetch_service::metrics;
use webfetch_service::{Method, Request};

use crate::fetch::{self, OutputFormat};
use crate::logging;

/// The HTTP method of a request.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum MethodArg {
    Get,
    Post,
    Put,
    Delete,
}

impl From<MethodArg> for Method {
    fn from(method: MethodArg) -> Self {
        match method {
            MethodArg::Get => Method::Get,
            MethodArg::Post => Method::Post,
            MethodArg::Put => Method::Put,
            MethodArg::Delete => Method::Delete,
        }
    }
}

/// Options shared by all commands that describe a request.
#[derive(Clone, Debug, Args)]
struct RequestArgs {
    /// The HTTP method.
    #[arg(long, short = 'X', value_enum, default_value = "get")]
    method: MethodArg,

    /// A request parameter as `key=value`, may be repeated.
    ///
    /// Parameters are sent in the query string for GET and DELETE, and form-encoded otherwise.
    #[arg(long = "param", short = 'p', value_name = "KEY=VALUE", value_parser = parse_key_val)]
    params: Vec<(String, String)>,

    /// A request header as `name=value`, may be repeated.
    #[arg(long = "header", short = 'H', value_name = "NAME=VALUE", value_parser = parse_key_val)]
    headers: Vec<(String, String)>,

    /// A raw request body.
    #[arg(long)]
    data: Option<String>,
}

impl RequestArgs {
    fn request(&self, url: &str) -> Request {
        let mut request = Request::new(self.method.into(), url);
        request.params = self.params.clone();
        request.headers = self.headers.clone();
        request.body = self.data.clone().map(Into::into);
        request
    }
}

/// Webfetch commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch one or more URLs.
    ///
    /// Identical requests are only executed once. Fresh responses are served from the cache.
    Fetch {
        /// The URLs to fetch.
        #[arg(required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        request: RequestArgs,

        /// How long a cached response may be reused, for example `10s` or `2h`.
        #[arg(long, value_parser = humantime::parse_duration)]
        cache_for: Option<Duration>,

        /// The output format.
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the cached response for a request, regardless of its age.
    Show {
        /// The URL of the request.
        url: String,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// Remove all cached responses.
    ClearCache,
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about, bin_name = "webfetch")]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected `key=value`, got `{s}`"))?;
    Ok((key.to_owned(), value.to_owned()))
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    // SAFETY: We are still in a single-threaded context, no runtime was started yet.
    unsafe { logging::init_logging(&config) };
    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    match cli.command {
        Command::Fetch {
            urls,
            request,
            cache_for,
            format,
        } => {
            let requests = urls
                .iter()
                .map(|url| {
                    let mut request = request.request(url);
                    request.cache_for = cache_for.map(Into::into);
                    request
                })
                .collect();
            fetch::fetch_all(&config, requests, format)?
        }
        Command::Show { url, request } => fetch::show(&config, request.request(&url))?,
        Command::ClearCache => fetch::clear_cache(&config).context("failed to clear the cache")?,
    }

    Ok(())
}
