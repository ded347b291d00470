//! Log output setup.
//!
//! The crate logs through `tracing`; installing a subscriber is left to the
//! application. With the `tracing-json` feature,
//! [`init_json_subscriber`] installs a JSON one.

/// Install a JSON `tracing` subscriber filtered by the `ARBOR_LOG`
/// environment variable (defaults to `info`).
#[cfg(feature = "tracing-json")]
pub fn init_json_subscriber() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("ARBOR_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init()
}
