pub mod actors;
pub mod config;
pub mod error;
pub mod stream;
pub mod util;

/// One alert banner as received from the remote stream.
///
/// Records are passed through untouched: no schema is enforced and the
/// writer serializes exactly what the fetcher received.
pub type Record = serde_json::Value;
