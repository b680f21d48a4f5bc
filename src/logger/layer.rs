//! Bridge from `tracing` events to a [`Logger`].

use std::fmt;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwapOption;
use tracing::field::{Field as TracingField, Visit};
use tracing::subscriber::Interest;
use tracing::{Event, Metadata, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

use super::caller::Caller;
use super::record::{Field, FieldValue};
use super::{Logger, LoggerError};

static GLOBAL: ArcSwapOption<Logger> = ArcSwapOption::const_empty();
static SUBSCRIBER: OnceLock<Result<(), String>> = OnceLock::new();

/// Makes `logger` the destination of every `tracing` event in the process.
///
/// The first call installs a global subscriber; later calls only swap the
/// destination, so the most recently installed logger wins.
pub fn install(logger: Logger) -> Result<(), LoggerError> {
    GLOBAL.store(Some(Arc::new(logger)));

    let installed = SUBSCRIBER.get_or_init(|| {
        let subscriber = tracing_subscriber::registry().with(LoggerLayer::global());
        tracing::subscriber::set_global_default(subscriber).map_err(|e| e.to_string())
    });
    match installed {
        Ok(()) => Ok(()),
        Err(reason) => Err(LoggerError::SubscriberInstalled(reason.clone())),
    }
}

/// The logger most recently passed to [`install`].
pub fn global() -> Option<Arc<Logger>> {
    GLOBAL.load_full()
}

#[derive(Debug, Clone)]
enum Target {
    Fixed(Logger),
    Global,
}

/// A `tracing_subscriber` layer that writes events through a [`Logger`].
///
/// The event target becomes the logger name and the event's source location
/// becomes the caller.
#[derive(Debug, Clone)]
pub struct LoggerLayer {
    target: Target,
}

impl LoggerLayer {
    pub fn new(logger: Logger) -> Self {
        Self {
            target: Target::Fixed(logger),
        }
    }

    /// Follows whichever logger was installed last.
    pub fn global() -> Self {
        Self {
            target: Target::Global,
        }
    }

    fn with_logger<R>(&self, f: impl FnOnce(&Logger) -> R) -> Option<R> {
        match &self.target {
            Target::Fixed(logger) => Some(f(logger)),
            Target::Global => GLOBAL.load().as_deref().map(f),
        }
    }
}

impl<S: Subscriber> Layer<S> for LoggerLayer {
    fn register_callsite(&self, _metadata: &'static Metadata<'static>) -> Interest {
        // The destination and its level can change at runtime.
        Interest::sometimes()
    }

    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        self.with_logger(|logger| logger.enabled(*metadata.level()))
            .unwrap_or(false)
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let caller = meta
            .file()
            .map(|file| Caller::new(file, meta.line().unwrap_or(0)));

        self.with_logger(|logger| {
            logger.emit(
                meta.target(),
                *meta.level(),
                caller.as_ref(),
                &visitor.message,
                &visitor.fields,
            )
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<Field>,
}

impl FieldVisitor {
    fn push(&mut self, field: &TracingField, value: FieldValue) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(Field::new(field.name(), value));
        }
    }
}

impl Visit for FieldVisitor {
    fn record_f64(&mut self, field: &TracingField, value: f64) {
        self.push(field, value.into());
    }

    fn record_i64(&mut self, field: &TracingField, value: i64) {
        self.push(field, value.into());
    }

    fn record_u64(&mut self, field: &TracingField, value: u64) {
        self.push(field, value.into());
    }

    fn record_bool(&mut self, field: &TracingField, value: bool) {
        self.push(field, value.into());
    }

    fn record_str(&mut self, field: &TracingField, value: &str) {
        self.push(field, value.into());
    }

    fn record_error(&mut self, field: &TracingField, value: &(dyn std::error::Error + 'static)) {
        self.push(field, value.to_string().into());
    }

    fn record_debug(&mut self, field: &TracingField, value: &dyn fmt::Debug) {
        self.push(field, format!("{value:?}").into());
    }
}
