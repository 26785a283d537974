//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! // Info-level logging for the strata crates
//! strata_observe::init_tracing(Some(0), false).unwrap();
//!
//! // Debug logging plus OpenTelemetry spans on stdout
//! strata_observe::init_tracing(Some(1), true).unwrap();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use std::sync::OnceLock;

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

const STRATA_CRATES: &[&str] = &["strata_api", "strata_core", "strata_infra"];

/// Filter directives used when `RUST_LOG` is not set.
///
/// `verbosity` counts `-v` flags: 0 is info, 1 is debug, 2+ is trace for
/// the strata crates. Everything else stays at warn. `None` (quiet) logs
/// errors only.
pub fn default_directives(verbosity: Option<u8>) -> String {
    let level = match verbosity {
        None => return "error".to_string(),
        Some(0) => "info",
        Some(1) => "debug",
        Some(_) => "trace",
    };
    let mut directives = vec!["warn".to_string()];
    directives.extend(STRATA_CRATES.iter().map(|c| format!("{c}={level}")));
    directives.join(",")
}

/// Initialize the global tracing subscriber.
///
/// - Always installs a structured `fmt` layer on stderr with target
///   visibility and span close timing, leaving stdout to command output.
/// - When `enable_otel` is true, additionally bridges tracing spans to
///   OpenTelemetry using a stdout exporter.
/// - `RUST_LOG` overrides the verbosity-derived filter.
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set or if
/// the filter directives are invalid.
pub fn init_tracing(verbosity: Option<u8>, enable_otel: bool) -> Result<(), Box<dyn std::error::Error>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    let env_filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(spec) if !spec.trim().is_empty() => EnvFilter::try_new(spec)?,
        _ => EnvFilter::try_new(default_directives(verbosity))?,
    };

    if enable_otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("strata");
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// Safe to call even when OTel was not enabled (no-op in that case).
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}
