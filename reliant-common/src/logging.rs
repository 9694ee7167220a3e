//! Logging setup and the event macros shared by the reliant crates.
//!
//! Events are split by target: engine lifecycle under [`ENGINE_TARGET`],
//! transport hand-offs under [`RESEND_TARGET`], and the enter/leave pairs
//! emitted by `#[traced]` under [`OPERATION_TARGET`].

use std::{str::FromStr, time::Instant};

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

/// Environment variable holding the maximum level to emit.
pub const LOG_LEVEL_ENV: &str = "RELIANT_LOG";

pub const ENGINE_TARGET: &str = "reliant::engine";
pub const RESEND_TARGET: &str = "reliant::resend";
pub const OPERATION_TARGET: &str = "reliant::operation";

/// Engine lifecycle events (registry start/stop, sequence suspension, ...).
///
/// Defaults to `TRACE`; `internal!(level = DEBUG, ..)` picks another level.
#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($arg:tt)+) => {
        $crate::tracing::event!(
            target: $crate::logging::ENGINE_TARGET,
            $crate::tracing::Level::$level,
            $($arg)+
        )
    };

    ($($arg:tt)+) => {
        $crate::internal!(level = TRACE, $($arg)+)
    };
}

/// Resend attempts handed to a transport.
#[macro_export]
macro_rules! resend {
    (level = $level:ident, $($arg:tt)+) => {
        $crate::tracing::event!(
            target: $crate::logging::RESEND_TARGET,
            $crate::tracing::Level::$level,
            $($arg)+
        )
    };

    ($($arg:tt)+) => {
        $crate::resend!(level = TRACE, $($arg)+)
    };
}

/// Level used when [`LOG_LEVEL_ENV`] is unset or unparsable.
pub const fn default_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    }
}

/// How the global subscriber is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LevelFilter,
    pub ansi: bool,
    /// A level value that could not be parsed and was replaced by the default.
    rejected: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            ansi: true,
            rejected: None,
        }
    }
}

impl LogSettings {
    /// Read [`LOG_LEVEL_ENV`]; colours are turned off when `NO_COLOR` is set.
    pub fn from_env() -> Self {
        Self::from_values(
            std::env::var(LOG_LEVEL_ENV).ok().as_deref(),
            std::env::var_os("NO_COLOR").is_some(),
        )
    }

    fn from_values(level: Option<&str>, no_color: bool) -> Self {
        let mut settings = Self {
            ansi: !no_color,
            ..Self::default()
        };

        if let Some(value) = level.map(str::trim).filter(|v| !v.is_empty()) {
            match LevelFilter::from_str(value) {
                Ok(level) => settings.level = level,
                Err(_) => settings.rejected = Some(value.to_string()),
            }
        }
        settings
    }

    /// Install the global subscriber. Only `reliant*` targets are emitted.
    ///
    /// Returns `false` if a global subscriber was already in place, in which
    /// case that one is kept.
    pub fn install(self) -> bool {
        let installed = tracing_subscriber::Registry::default()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_file(false)
                    .with_line_number(false)
                    .compact()
                    .with_ansi(self.ansi)
                    .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                    .with_filter(self.level)
                    .with_filter(FilterFn::new(|metadata| {
                        metadata.target().starts_with("reliant")
                    })),
            )
            .try_init()
            .is_ok();

        if installed && let Some(value) = &self.rejected {
            tracing::warn!(
                target: ENGINE_TARGET,
                value = %value,
                fallback = %self.level,
                "Ignoring invalid {LOG_LEVEL_ENV}"
            );
        }
        installed
    }
}

/// Install the global subscriber from the environment. Later calls are no-ops.
pub fn init() {
    LogSettings::from_env().install();
}

/// Paired `enter`/`leave` events around one call, created by `#[traced]`.
///
/// `leave` carries the elapsed time in microseconds and is emitted on drop,
/// so early returns and `?` are covered.
#[must_use]
#[derive(Debug)]
pub struct OperationGuard {
    operation: &'static str,
    started: Instant,
}

impl OperationGuard {
    pub fn enter(operation: &'static str) -> Self {
        tracing::trace!(target: OPERATION_TARGET, operation, "enter");
        Self {
            operation,
            started: Instant::now(),
        }
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let elapsed_us = u64::try_from(self.started.elapsed().as_micros()).unwrap_or(u64::MAX);
        tracing::trace!(
            target: OPERATION_TARGET,
            operation = self.operation,
            elapsed_us,
            "leave"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::Context;

    use super::*;

    /// Collects `(target, message, operation)` for every event.
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<(String, String, Option<String>)>>>);

    #[derive(Default)]
    struct Fields {
        message: String,
        operation: Option<String>,
    }

    impl Visit for Fields {
        fn record_str(&mut self, field: &Field, value: &str) {
            if field.name() == "operation" {
                self.operation = Some(value.to_string());
            }
        }

        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.message = format!("{value:?}");
            }
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for Capture {
        fn on_event(&self, event: &tracing::Event<'_>, _: Context<'_, S>) {
            let mut fields = Fields::default();
            event.record(&mut fields);
            self.0.lock().unwrap().push((
                event.metadata().target().to_string(),
                fields.message,
                fields.operation,
            ));
        }
    }

    fn captured(f: impl FnOnce()) -> Vec<(String, String, Option<String>)> {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::Registry::default().with(capture.clone());
        tracing::subscriber::with_default(subscriber, f);
        capture.0.lock().unwrap().clone()
    }

    #[test]
    fn parses_known_levels() {
        assert_eq!(LogSettings::from_values(Some("warn"), false).level, LevelFilter::WARN);
        assert_eq!(LogSettings::from_values(Some(" INFO "), false).level, LevelFilter::INFO);
        assert_eq!(LogSettings::from_values(Some("off"), false).level, LevelFilter::OFF);
    }

    #[test]
    fn invalid_level_falls_back_to_default() {
        let settings = LogSettings::from_values(Some("loud"), true);

        assert_eq!(settings.level, default_level());
        assert_eq!(settings.rejected.as_deref(), Some("loud"));
        assert!(!settings.ansi);

        assert_eq!(LogSettings::from_values(None, false), LogSettings::default());
        assert_eq!(LogSettings::from_values(Some(""), false), LogSettings::default());
    }

    #[test]
    fn operation_guard_pairs_events() {
        let events = captured(|| {
            let _guard = OperationGuard::enter("purge_all");
        });

        assert_eq!(
            events,
            vec![
                (
                    OPERATION_TARGET.to_string(),
                    "enter".to_string(),
                    Some("purge_all".to_string())
                ),
                (
                    OPERATION_TARGET.to_string(),
                    "leave".to_string(),
                    Some("purge_all".to_string())
                ),
            ]
        );
    }

    #[test]
    fn macros_use_their_targets() {
        let events = captured(|| {
            crate::internal!(level = DEBUG, "Suspended sequence {}", "S1");
            crate::resend!("Resending message {}", 4);
        });

        let targets: Vec<&str> = events.iter().map(|(t, _, _)| t.as_str()).collect();
        assert_eq!(targets, vec![ENGINE_TARGET, RESEND_TARGET]);
        assert_eq!(events[0].1, "Suspended sequence S1");
    }

    #[test]
    fn init_twice_does_not_panic() {
        init();
        init();
    }
}
