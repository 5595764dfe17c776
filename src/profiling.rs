//! Tracing subscribers.
//!
//! [`init_logging`] installs a plain `fmt` subscriber filtered by `RUST_LOG`.
//! With the `profiling` feature, [`init`] instead installs a Chrome trace
//! layer writing `trace.json`; the spans around prompt assembly, the decode
//! loop, codec decode and watermarking show up there. Open the file in
//! `chrome://tracing` or [Perfetto](https://ui.perfetto.dev).

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "csm_engine=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install a global `fmt` subscriber. Fails if one is already set.
pub fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}

/// Guard that flushes the trace file on drop.
///
/// Hold this in `main()`; the trace is written when the guard is dropped.
#[cfg(feature = "profiling")]
pub struct ProfilingGuard {
    _guard: tracing_chrome::FlushGuard,
}

/// Zero-size stand-in when profiling is disabled.
#[cfg(not(feature = "profiling"))]
pub struct ProfilingGuard;

/// Initialize the Chrome tracing layer.
///
/// Returns `Some(guard)` when the `profiling` feature is active, `None` otherwise.
///
/// ```rust,ignore
/// let _guard = csm_engine::profiling::init();
/// // ... run workload ...
/// ```
pub fn init() -> Option<ProfilingGuard> {
    #[cfg(feature = "profiling")]
    {
        use tracing_chrome::ChromeLayerBuilder;
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let (chrome_layer, guard) = ChromeLayerBuilder::new()
            .file("trace.json")
            .include_args(true)
            .build();

        if tracing_subscriber::registry()
            .with(env_filter())
            .with(chrome_layer)
            .try_init()
            .is_err()
        {
            tracing::warn!("A tracing subscriber is already installed; profiling disabled");
            return None;
        }

        tracing::info!("Profiling enabled, trace will be written to trace.json");
        Some(ProfilingGuard { _guard: guard })
    }

    #[cfg(not(feature = "profiling"))]
    {
        None
    }
}
