//! Tracing subscriber initialisation.
//!
//! Call [`init_tracing`] once at process startup.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `IMPRINT_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//!
//! # Example
//!
//! ```rust,no_run
//! imprint_runtime::telemetry::init_tracing("imprint").expect("tracing already set");
//! ```

use imprint_types::ImprintError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global `tracing` subscriber.
///
/// # Errors
///
/// [`ImprintError::Configuration`] if a global subscriber is already set.
pub fn init_tracing(service_name: &str) -> Result<(), ImprintError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if json_requested() {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
    };
    result.map_err(|e| {
        ImprintError::Configuration(format!("{service_name}: tracing init failed: {e}"))
    })?;

    tracing::info!(service = service_name, "tracing initialised");
    Ok(())
}

fn json_requested() -> bool {
    std::env::var("IMPRINT_LOG_FORMAT").as_deref() == Ok("json")
}
