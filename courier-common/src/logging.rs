use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:tt)*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg)*)
    }};
}

/// Events about work leaving the process, e.g. a send handed to a provider
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::outgoing!(level = TRACE, $($msg)*)
    };
}

/// Lifecycle events of the pipeline itself
#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::internal!(level = INFO, $($msg)*)
    };
}

/// Resolve the level filter from `LOG_LEVEL`, falling back to `default`
fn level_from_env(default: LevelFilter) -> LevelFilter {
    std::env::var("LOG_LEVEL").map_or(default, |level| {
        LevelFilter::from_str(level.as_str()).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    })
}

/// Install the global subscriber
///
/// Calling this more than once (e.g. from several tests) is harmless, later
/// calls are ignored.
pub fn init() {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    let level = level_from_env(default);

    let _ = tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("courier")
                })),
        )
        .try_init();
}
