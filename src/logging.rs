use std::time::Duration;

use anyhow::{Result, anyhow};
use http::StatusCode;
use time::OffsetDateTime;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogFormat;

const DEFAULT_FILTER: &str = "info";

pub fn init_logger(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match format {
        LogFormat::Json => fmt::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .try_init()
            .map_err(|err| anyhow!(err))?,
        LogFormat::Text => fmt::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .try_init()
            .map_err(|err| anyhow!(err))?,
    }

    Ok(())
}

/// One structured log line per handled request.
#[derive(Debug, Clone)]
pub struct RequestLogEvent {
    pub method: String,
    pub path: String,
    pub rule: Option<String>,
    pub strategy: Option<String>,
    pub status: u16,
    pub outcome: String,
    pub fallback: Option<String>,
    pub elapsed_ms: u128,
    pub error_reason: Option<String>,
}

#[derive(Debug)]
pub struct RequestLogBuilder {
    event: RequestLogEvent,
}

impl RequestLogBuilder {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            event: RequestLogEvent {
                method: method.into(),
                path: path.into(),
                rule: None,
                strategy: None,
                status: 0,
                outcome: String::from("UNKNOWN"),
                fallback: None,
                elapsed_ms: 0,
                error_reason: None,
            },
        }
    }

    pub fn rule(mut self, rule: impl Into<String>) -> Self {
        self.event.rule = Some(rule.into());
        self
    }

    pub fn strategy(mut self, strategy: impl Into<String>) -> Self {
        self.event.strategy = Some(strategy.into());
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.event.status = status.as_u16();
        self
    }

    pub fn outcome(mut self, outcome: impl Into<String>) -> Self {
        self.event.outcome = outcome.into();
        self
    }

    pub fn fallback(mut self, kind: impl Into<String>) -> Self {
        self.event.fallback = Some(kind.into());
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.event.elapsed_ms = elapsed.as_millis();
        self
    }

    pub fn error_reason(mut self, reason: impl Into<String>) -> Self {
        self.event.error_reason = Some(reason.into());
        self
    }

    pub fn build(self) -> RequestLogEvent {
        self.event
    }

    pub fn log(self) {
        log_request(self.build());
    }
}

pub fn log_request(event: RequestLogEvent) {
    let RequestLogEvent {
        method,
        path,
        rule,
        strategy,
        status,
        outcome,
        fallback,
        elapsed_ms,
        error_reason,
    } = event;

    let now = OffsetDateTime::now_utc();
    let (year, month, day) = now.to_calendar_date();
    let (hour, minute, second) = now.to_hms();
    let millisecond = now.millisecond();
    let month_number: u8 = month.into();
    let ts = format!(
        "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millisecond:03}Z",
        month = month_number
    );

    let rule_field = rule.as_deref();
    let strategy_field = strategy.as_deref();
    let fallback_field = fallback.as_deref();
    let error_reason_field = error_reason.as_deref();

    tracing::info!(
        target = "request_log",
        ts,
        method,
        path,
        rule = rule_field,
        strategy = strategy_field,
        status,
        outcome,
        fallback = fallback_field,
        elapsed_ms,
        error_reason = error_reason_field
    );

    crate::metrics::record_request(
        &outcome,
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    );
}
