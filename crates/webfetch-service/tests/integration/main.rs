// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod cache;
pub mod coalescing;
pub mod lifecycle;
pub mod transport;
pub mod utils;

pub use utils::*;
