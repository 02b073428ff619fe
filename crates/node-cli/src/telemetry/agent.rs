//! Span exporter shipping newline-delimited JSON to a collector agent.
//!
//! The exporter runs inside the tracer provider's simple span processor, so
//! every batch is written and flushed before `export` returns and nothing is
//! left queued at exit. A failed connection is retried after a short delay;
//! spans finished in between are dropped.

use std::collections::BTreeMap;
use std::env;
use std::io::{self, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant, UNIX_EPOCH};

use futures_util::future::BoxFuture;
use opentelemetry::trace::SpanId;
use opentelemetry_sdk::export::trace::{ExportResult, SpanData};
use serde::Serialize;
use tracing::{debug, warn};

use super::trace::{ExporterContext, ExporterInit, SpanExporter, TraceError};
use crate::cancel::Cancellation;

/// Name the agent exporter is registered under.
pub const AGENT_EXPORTER: &str = "agent";
/// Environment variable naming the collector endpoint.
pub const ENDPOINT_ENV: &str = "TRACE_AGENT_ENDPOINT";
/// Endpoint used when [`ENDPOINT_ENV`] is unset.
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:6831";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
const RECONNECT_DELAY: Duration = Duration::from_secs(10);
const AGENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::trace::agent");

/// Initialisation function for the agent exporter, reading the endpoint from
/// [`ENDPOINT_ENV`].
#[must_use]
pub fn exporter_init() -> ExporterInit {
    Box::new(|context| {
        let endpoint = env::var(ENDPOINT_ENV).ok();
        init_with(endpoint, context)
    })
}

/// Builds the agent exporter for `endpoint`, falling back to
/// [`DEFAULT_ENDPOINT`] when it is absent or blank.
///
/// The endpoint is resolved when the first batch is written, so an
/// unreachable agent never fails initialisation.
///
/// # Errors
///
/// Never fails; the signature matches [`ExporterInit`].
pub fn init_with(
    endpoint: Option<String>,
    context: &ExporterContext<'_>,
) -> Result<Box<dyn SpanExporter>, TraceError> {
    Ok(Box::new(AgentExporter::new(
        resolve_endpoint(endpoint),
        context.service_name,
        context.cancellation.clone(),
    )))
}

/// Trimmed endpoint, or [`DEFAULT_ENDPOINT`] when absent or blank.
#[must_use]
pub fn resolve_endpoint(endpoint: Option<String>) -> String {
    endpoint
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned())
}

/// One finished span as written to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpanRecord {
    /// Hex trace identifier shared by every span of one trace.
    pub trace_id: String,
    /// Hex identifier of this span.
    pub span_id: String,
    /// Hex identifier of the parent span, if any.
    pub parent_id: Option<String>,
    /// Span name.
    pub name: String,
    /// Service the span belongs to.
    pub service: String,
    /// Wall-clock start, microseconds since the Unix epoch.
    pub start_unix_micros: u64,
    /// Span duration in microseconds.
    pub duration_micros: u64,
    /// Attributes recorded on the span.
    pub attributes: BTreeMap<String, String>,
}

impl SpanRecord {
    /// Flattens `span` for the wire, attributing it to `service`.
    #[must_use]
    pub fn new(span: &SpanData, service: &str) -> Self {
        let parent_id =
            (span.parent_span_id != SpanId::INVALID).then(|| span.parent_span_id.to_string());
        Self {
            trace_id: span.span_context.trace_id().to_string(),
            span_id: span.span_context.span_id().to_string(),
            parent_id,
            name: span.name.clone().into_owned(),
            service: service.to_owned(),
            start_unix_micros: micros(
                span.start_time
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default(),
            ),
            duration_micros: micros(
                span.end_time
                    .duration_since(span.start_time)
                    .unwrap_or_default(),
            ),
            attributes: span
                .attributes
                .iter()
                .map(|pair| (pair.key.as_str().to_owned(), pair.value.to_string()))
                .collect(),
        }
    }
}

fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

/// Exporter writing each batch to a lazily opened TCP connection.
#[derive(Debug)]
pub struct AgentExporter {
    endpoint: String,
    service: String,
    cancellation: Cancellation,
    connection: Option<BufWriter<TcpStream>>,
    retry_at: Option<Instant>,
}

impl AgentExporter {
    /// Exporter for `endpoint`; nothing is dialled until the first batch.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, service: &str, cancellation: Cancellation) -> Self {
        Self {
            endpoint: endpoint.into(),
            service: service.to_owned(),
            cancellation,
            connection: None,
            retry_at: None,
        }
    }

    /// Collector endpoint spans are written to.
    #[must_use]
    pub const fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    fn reconnect(&mut self) {
        if self.cancellation.is_cancelled() {
            debug!(target: AGENT_TARGET, "cancelled; not reconnecting to trace agent");
            return;
        }
        if self.retry_at.is_some_and(|at| Instant::now() < at) {
            return;
        }
        self.connection = connect(&self.endpoint).map(BufWriter::new);
        self.retry_at = if self.connection.is_some() {
            None
        } else {
            Instant::now().checked_add(RECONNECT_DELAY)
        };
    }

    fn send(&mut self, batch: &[SpanData]) {
        if batch.is_empty() {
            return;
        }
        if self.connection.is_none() {
            self.reconnect();
        }
        let Some(writer) = self.connection.as_mut() else {
            debug!(
                target: AGENT_TARGET,
                spans = batch.len(),
                "trace agent unavailable; spans dropped"
            );
            return;
        };
        if let Err(error) = write_batch(writer, batch, &self.service) {
            warn!(
                target: AGENT_TARGET,
                endpoint = %self.endpoint,
                error = %error,
                "failed to write spans to trace agent; reconnecting on next batch"
            );
            self.connection = None;
        }
    }
}

impl SpanExporter for AgentExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        self.send(&batch);
        Box::pin(async { Ok(()) })
    }

    fn shutdown(&mut self) {
        if let Some(mut writer) = self.connection.take()
            && let Err(error) = writer.flush()
        {
            debug!(target: AGENT_TARGET, error = %error, "failed to flush trace agent connection");
        }
    }
}

fn connect(endpoint: &str) -> Option<TcpStream> {
    endpoint
        .to_socket_addrs()
        .and_then(|mut addresses| {
            addresses
                .next()
                .ok_or_else(|| io::Error::other("endpoint resolved to no address"))
        })
        .and_then(|address| TcpStream::connect_timeout(&address, CONNECT_TIMEOUT))
        .and_then(|stream| {
            stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
            Ok(stream)
        })
        .inspect_err(|error| {
            warn!(
                target: AGENT_TARGET,
                endpoint,
                error = %error,
                "failed to connect to trace agent"
            );
        })
        .ok()
}

fn write_batch(
    writer: &mut BufWriter<TcpStream>,
    batch: &[SpanData],
    service: &str,
) -> io::Result<()> {
    for span in batch {
        serde_json::to_writer(&mut *writer, &SpanRecord::new(span, service))?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}
