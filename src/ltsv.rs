//! LTSV (labeled tab-separated values) event formatter for `tracing`.
//!
//! Renders one event per line as `level:info\tmsg:...\tkey:value\ttime:...`.
//! Values made of `[a-zA-Z0-9.-]` are written bare; anything else is
//! JSON-style quoted so tabs and newlines never break the framing.

use std::fmt;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Event formatter producing LTSV lines.
#[derive(Debug, Default)]
pub struct LtsvFormatter {
    timer: SystemTime,
}

impl LtsvFormatter {
    pub fn new() -> LtsvFormatter {
        LtsvFormatter::default()
    }
}

impl<S, N> FormatEvent<S, N> for LtsvFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = LtsvVisitor::default();
        event.record(&mut visitor);

        write!(writer, "level:{}", event.metadata().level().as_str().to_ascii_lowercase())?;
        if !visitor.message.is_empty() {
            write!(writer, "\tmsg:{}", quote_value(&visitor.message))?;
        }
        visitor.fields.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value, pre_rendered) in &visitor.fields {
            if *pre_rendered {
                write!(writer, "\t{key}:{value}")?;
            } else {
                write!(writer, "\t{key}:{}", quote_value(value))?;
            }
        }
        write!(writer, "\ttime:")?;
        self.timer.format_time(&mut writer)?;
        writeln!(writer)
    }
}

/// Collects event fields; numbers stay bare, strings go through quoting.
#[derive(Default)]
struct LtsvVisitor {
    message: String,
    /// (key, rendered value, value is already safe to emit bare)
    fields: Vec<(String, String, bool)>,
}

impl LtsvVisitor {
    fn push(&mut self, field: &Field, value: String, pre_rendered: bool) {
        if field.name() == "message" {
            self.message = value;
            return;
        }
        // `level`, `msg`, and `time` are produced by the formatter itself.
        let key = match field.name() {
            name @ ("level" | "msg" | "time") => format!("fields.{name}"),
            name => name.to_string(),
        };
        self.fields.push((key, value, pre_rendered));
    }
}

impl Visit for LtsvVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string(), false);
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, value.to_string(), true);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, value.to_string(), true);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, format!("{value:.6}"), true);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, value.to_string(), true);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.push(field, value.to_string(), false);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{value:?}").trim_matches('"').to_string(), false);
    }
}

/// Bare when every byte is `[a-zA-Z0-9.-]`, quoted otherwise.
fn quote_value(value: &str) -> String {
    let bare = !value.is_empty()
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if bare {
        value.to_string()
    } else {
        format!("{value:?}")
    }
}
