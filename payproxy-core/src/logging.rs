use crate::config::{LogFormat, LogOutput, LoggingConfig};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields, FormattedFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter,
};

const REDACTED: &str = "[REDACTED]";

/// Structured log entry for JSON output
#[derive(Debug, Serialize)]
pub struct StructuredLogEntry {
    /// Timestamp in RFC3339 format
    pub timestamp: String,
    pub level: String,
    /// Component/module name
    pub component: String,
    pub message: String,
    /// Fields of the enclosing span, e.g. the connection id and peer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

/// JSON formatter that can mask credentials and payout addresses
pub struct JsonFormatter {
    redact_sensitive: bool,
}

impl JsonFormatter {
    pub fn new(redact_sensitive: bool) -> Self {
        Self { redact_sensitive }
    }

    fn redact_fields(&self, fields: &mut HashMap<String, serde_json::Value>) {
        if !self.redact_sensitive {
            return;
        }

        let sensitive_keys = ["password", "secret", "token", "credential", "auth_header"];

        for (key, value) in fields.iter_mut() {
            let key_lower = key.to_lowercase();
            if sensitive_keys.iter().any(|&sensitive| key_lower.contains(sensitive)) {
                *value = serde_json::Value::String(REDACTED.to_string());
            } else if let serde_json::Value::String(s) = value {
                if key == "message" {
                    *s = self.redact_text(s);
                } else if looks_like_payout_address(s) {
                    *value = serde_json::Value::String(REDACTED.to_string());
                }
            }
        }
    }

    /// Mask address-like tokens inside free text such as relayed frames
    fn redact_text(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut token = String::new();
        for c in text.chars() {
            if c.is_ascii_alphanumeric() {
                token.push(c);
                continue;
            }
            flush_token(&mut out, &mut token);
            out.push(c);
        }
        flush_token(&mut out, &mut token);
        out
    }
}

fn flush_token(out: &mut String, token: &mut String) {
    if looks_like_payout_address(token) {
        out.push_str(REDACTED);
    } else {
        out.push_str(token);
    }
    token.clear();
}

/// Transparent (t1/t3) and Sapling (zs) address heuristics
fn looks_like_payout_address(s: &str) -> bool {
    let alnum = s.chars().all(|c| c.is_ascii_alphanumeric());
    alnum
        && (((s.starts_with("t1") || s.starts_with("t3")) && s.len() == 35)
            || (s.starts_with("zs1") && s.len() >= 70))
}

impl<S, N> FormatEvent<S, N> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        let span = ctx.lookup_current().map(|span| {
            let extensions = span.extensions();
            match extensions.get::<FormattedFields<N>>() {
                Some(fields) if !fields.is_empty() => format!("{}{{{}}}", span.name(), fields),
                _ => span.name().to_string(),
            }
        });

        let mut fields = HashMap::new();
        event.record(&mut JsonFieldVisitor::new(&mut fields));
        self.redact_fields(&mut fields);

        let message = fields
            .remove("message")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        let entry = StructuredLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: metadata.level().to_string(),
            component: metadata.target().to_string(),
            message,
            span: span.map(|s| if self.redact_sensitive { self.redact_text(&s) } else { s }),
            fields,
        };

        let json = serde_json::to_string(&entry).map_err(|_| fmt::Error)?;
        writeln!(writer, "{}", json)
    }
}

/// Visitor for collecting event fields into a HashMap
struct JsonFieldVisitor<'a> {
    fields: &'a mut HashMap<String, serde_json::Value>,
}

impl<'a> JsonFieldVisitor<'a> {
    fn new(fields: &'a mut HashMap<String, serde_json::Value>) -> Self {
        Self { fields }
    }
}

impl<'a> tracing::field::Visit for JsonFieldVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        self.fields.insert(
            field.name().to_string(),
            serde_json::Value::String(format!("{:?}", value)),
        );
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields.insert(
            field.name().to_string(),
            serde_json::Value::String(value.to_string()),
        );
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

/// Build the level filter; `RUST_LOG` wins over the configured level
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::Config(format!("Invalid log level {}: {}", config.level, e)))?;

    for (component, level) in &config.component_levels {
        let directive = format!("{}={}", component, level)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid log directive for {}: {}", component, e)))?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

/// Initialize the global subscriber from the logging configuration
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let file = match &config.output {
        LogOutput::Stdout => None,
        LogOutput::File(path) => Some(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?,
        ),
    };

    let result = match (&config.format, file) {
        (LogFormat::Json, None) => registry
            .with(tracing_subscriber::fmt::layer().event_format(JsonFormatter::new(config.redact_sensitive_data)))
            .try_init(),
        (LogFormat::Json, Some(file)) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(JsonFormatter::new(config.redact_sensitive_data))
                    .with_writer(std::sync::Mutex::new(file)),
            )
            .try_init(),
        (LogFormat::Pretty, None) => registry.with(tracing_subscriber::fmt::layer().pretty()).try_init(),
        (LogFormat::Pretty, Some(file)) => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_ansi(false).with_writer(std::sync::Mutex::new(file)))
            .try_init(),
        (LogFormat::Compact, None) => registry.with(tracing_subscriber::fmt::layer().compact()).try_init(),
        (LogFormat::Compact, Some(file)) => registry
            .with(tracing_subscriber::fmt::layer().compact().with_ansi(false).with_writer(std::sync::Mutex::new(file)))
            .try_init(),
    };

    result.map_err(|e| Error::Internal(format!("Failed to install log subscriber: {}", e)))
}
