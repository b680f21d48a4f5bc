//! Logging for database query hooks.
//!
//! Data-access layers report each statement through [`QueryLogger::trace`];
//! the adapter classifies the outcome, flags slow statements and attributes
//! every record to the application code that issued the query.

use std::error::Error;
use std::fmt;
use std::panic::Location;
use std::time::{Duration, Instant};

use tracing::Level;

use super::caller::{Caller, CallerResolver};
use super::record::Field;
use super::Logger;
use crate::helpers::microseconds_str;

/// Default slow-statement threshold.
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(200);

/// Driver crates skipped when attributing a record to its caller.
pub const DEFAULT_DRIVER_PATHS: &[&str] = &[
    "sqlx-",
    "diesel-",
    "sea-orm-",
    "rusqlite-",
    "tokio-postgres-",
];

/// Hook interface for data-access layers.
pub trait QueryLogger: Send + Sync {
    fn info(&self, args: fmt::Arguments<'_>);

    fn warn(&self, args: fmt::Arguments<'_>);

    fn error(&self, args: fmt::Arguments<'_>);

    /// Reports a finished statement.
    ///
    /// `query` returns the statement text and the affected row count; it is
    /// only called when a record is written.
    fn trace(
        &self,
        begin: Instant,
        query: &dyn Fn() -> (String, i64),
        err: Option<&(dyn Error + 'static)>,
    );
}

/// The benign "no rows" outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, thiserror::Error)]
#[error("record not found")]
pub struct RecordNotFound;

/// Classification of a traced statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    Success,
    NotFound,
    Error,
}

type NotFoundFn = dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync;

impl QueryOutcome {
    /// Classifies `err`, treating [`RecordNotFound`] anywhere in its source
    /// chain as not-found.
    pub fn classify(err: Option<&(dyn Error + 'static)>) -> Self {
        Self::classify_with(err, &|e: &(dyn Error + 'static)| e.is::<RecordNotFound>())
    }

    fn classify_with(err: Option<&(dyn Error + 'static)>, not_found: &NotFoundFn) -> Self {
        let Some(err) = err else {
            return QueryOutcome::Success;
        };

        let mut current = Some(err);
        while let Some(e) = current {
            if not_found(e) {
                return QueryOutcome::NotFound;
            }
            current = e.source();
        }
        QueryOutcome::Error
    }
}

/// Turns query hook calls into structured log records.
pub struct QueryLoggingAdapter {
    logger: Logger,
    slow_threshold: Duration,
    resolver: CallerResolver,
    not_found: Box<NotFoundFn>,
}

impl fmt::Debug for QueryLoggingAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryLoggingAdapter")
            .field("logger", &self.logger)
            .field("slow_threshold", &self.slow_threshold)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl QueryLoggingAdapter {
    /// Frames in driver crates ([`DEFAULT_DRIVER_PATHS`]) and in this
    /// adapter are never reported as the caller.
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
            resolver: CallerResolver::new(DEFAULT_DRIVER_PATHS.iter().copied()).exclude(file!()),
            not_found: Box::new(|e: &(dyn Error + 'static)| e.is::<RecordNotFound>()),
        }
    }

    /// Zero disables slow-statement warnings.
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    /// Adds a path substring whose frames are never reported as the caller.
    pub fn with_excluded(mut self, path: impl Into<String>) -> Self {
        self.resolver = self.resolver.exclude(path);
        self
    }

    /// Recognizes a driver's own not-found error in addition to
    /// [`RecordNotFound`].
    pub fn with_not_found<F>(mut self, is_not_found: F) -> Self
    where
        F: Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.not_found =
            Box::new(move |e: &(dyn Error + 'static)| e.is::<RecordNotFound>() || is_not_found(e));
        self
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    pub fn classify(&self, err: Option<&(dyn Error + 'static)>) -> QueryOutcome {
        QueryOutcome::classify_with(err, &*self.not_found)
    }

    fn caller(&self, fallback: &Location<'_>) -> Caller {
        self.resolver.resolve(Caller::from(fallback))
    }

    #[track_caller]
    fn pass_through(&self, level: Level, args: fmt::Arguments<'_>) {
        if !self.logger.enabled(level) {
            return;
        }
        let caller = self.caller(Location::caller());
        let message = args.to_string();
        self.logger.log_at(level, Some(&caller), &message, &[]);
    }
}

impl QueryLogger for QueryLoggingAdapter {
    #[track_caller]
    fn info(&self, args: fmt::Arguments<'_>) {
        self.pass_through(Level::INFO, args);
    }

    #[track_caller]
    fn warn(&self, args: fmt::Arguments<'_>) {
        self.pass_through(Level::WARN, args);
    }

    #[track_caller]
    fn error(&self, args: fmt::Arguments<'_>) {
        self.pass_through(Level::ERROR, args);
    }

    #[track_caller]
    fn trace(
        &self,
        begin: Instant,
        query: &dyn Fn() -> (String, i64),
        err: Option<&(dyn Error + 'static)>,
    ) {
        let elapsed = begin.elapsed();
        let outcome = self.classify(err);
        let slow = !self.slow_threshold.is_zero() && elapsed > self.slow_threshold;

        let outcome_level = match outcome {
            QueryOutcome::Success => None,
            QueryOutcome::NotFound => Some(Level::WARN),
            QueryOutcome::Error => Some(Level::ERROR),
        };
        let outcome_level = outcome_level.filter(|level| self.logger.enabled(*level));
        let slow = slow && self.logger.enabled(Level::WARN);
        if outcome_level.is_none() && !slow {
            return;
        }

        let caller = self.caller(Location::caller());
        let (sql, rows) = query();
        let mut fields = vec![
            Field::new("sql", sql),
            Field::new("time", microseconds_str(elapsed)),
            Field::new("rows", rows),
        ];

        match (outcome, err) {
            (QueryOutcome::NotFound, _) if outcome_level.is_some() => {
                self.logger
                    .log_at(Level::WARN, Some(&caller), "Database ErrRecordNotFound", &fields);
            }
            (QueryOutcome::Error, Some(err)) if outcome_level.is_some() => {
                fields.push(Field::error(err));
                self.logger
                    .log_at(Level::ERROR, Some(&caller), "Database Error", &fields);
            }
            _ => {}
        }

        if slow {
            self.logger
                .log_at(Level::WARN, Some(&caller), "Database Slow Log", &fields);
        }
    }
}
