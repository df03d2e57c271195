//! Webfetch.
//!
//! Webfetch fetches resources over HTTP while sharing identical requests. Requests for the same
//! URL, parameters, headers and body are executed once, and every caller receives the same
//! result. Responses are cached on disk and reused for as long as the caller allows.

#![warn(
    missing_docs,
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod fetch;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
