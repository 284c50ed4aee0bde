use http::HeaderMap;
use serde_json::Value;
use std::io::{self, Write};
use tracing_subscriber::fmt::MakeWriter;

use crate::enricher::Enricher;
use crate::error::LogError;
use crate::record::LogRecord;
use crate::severity::Severity;

/// Writes enriched log lines directly, without going through `tracing`.
///
/// Construct it once at startup and pass it by reference to whatever needs
/// to log. Each call enriches one record and writes it as a single line;
/// nothing is buffered between calls.
pub struct CloudLogger<W = fn() -> io::Stdout> {
    enricher: Enricher,
    make_writer: W,
}

impl CloudLogger {
    /// Logger writing to stdout.
    pub fn stdout(enricher: Enricher) -> Self {
        Self {
            enricher,
            make_writer: io::stdout,
        }
    }
}

impl<W> CloudLogger<W>
where
    W: for<'a> MakeWriter<'a>,
{
    pub fn with_writer(enricher: Enricher, make_writer: W) -> Self {
        Self {
            enricher,
            make_writer,
        }
    }

    pub fn enricher(&self) -> &Enricher {
        &self.enricher
    }

    /// Enrich `record` and write it. On error nothing is written.
    pub fn emit(
        &self,
        record: LogRecord,
        args: &[Value],
        headers: Option<&HeaderMap>,
    ) -> Result<(), LogError> {
        let mut line = self.enricher.render(record, args, headers)?;
        line.push('\n');
        let mut writer = self.make_writer.make_writer();
        writer.write_all(line.as_bytes())?;
        Ok(())
    }

    pub fn log(
        &self,
        severity: Severity,
        event: &str,
        args: &[Value],
        headers: Option<&HeaderMap>,
    ) -> Result<(), LogError> {
        self.emit(LogRecord::for_event(severity, event), args, headers)
    }

    /// Start a bound logger; fields added with [`BoundLogger::bind`] go
    /// into every record it writes.
    pub fn bind(&self) -> BoundLogger<'_, W> {
        BoundLogger {
            logger: self,
            headers: None,
            fields: LogRecord::new(),
        }
    }

    /// A logger for the request that carried `headers`; records it writes
    /// are trace-correlated when the request has a trace header.
    pub fn request<'a>(&'a self, headers: &'a HeaderMap) -> BoundLogger<'a, W> {
        BoundLogger {
            logger: self,
            headers: Some(headers),
            fields: LogRecord::new(),
        }
    }

    /// Output is written through on every call, so there is nothing to flush.
    pub fn flush(&self) -> Result<(), LogError> {
        Ok(())
    }
}

/// A [`CloudLogger`] plus fields and request headers that apply to every call.
pub struct BoundLogger<'a, W> {
    logger: &'a CloudLogger<W>,
    headers: Option<&'a HeaderMap>,
    fields: LogRecord,
}

impl<'a, W> BoundLogger<'a, W>
where
    W: for<'w> MakeWriter<'w>,
{
    pub fn bind(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key, value);
        self
    }

    /// Attach the request headers of the current request.
    pub fn with_headers(mut self, headers: &'a HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn log(&self, severity: Severity, event: &str, args: &[Value]) -> Result<(), LogError> {
        let mut record = self.fields.clone();
        record.extend(&LogRecord::for_event(severity, event));
        self.logger.emit(record, args, self.headers)
    }

    pub fn debug(&self, event: &str, args: &[Value]) -> Result<(), LogError> {
        self.log(Severity::Debug, event, args)
    }

    pub fn info(&self, event: &str, args: &[Value]) -> Result<(), LogError> {
        self.log(Severity::Info, event, args)
    }

    pub fn notice(&self, event: &str, args: &[Value]) -> Result<(), LogError> {
        self.log(Severity::Notice, event, args)
    }

    pub fn warning(&self, event: &str, args: &[Value]) -> Result<(), LogError> {
        self.log(Severity::Warning, event, args)
    }

    pub fn error(&self, event: &str, args: &[Value]) -> Result<(), LogError> {
        self.log(Severity::Error, event, args)
    }

    pub fn critical(&self, event: &str, args: &[Value]) -> Result<(), LogError> {
        self.log(Severity::Critical, event, args)
    }
}
