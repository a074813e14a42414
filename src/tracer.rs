//! Per-request distributed tracing context
//!
//! A [`TracerHandle`] is built once at startup and handed to the engine;
//! nothing here touches the global OpenTelemetry tracer. For each inbound
//! request [`TracerHandle::context`] yields a [`TraceContext`], which holds
//! at most one parent span (the inbound request) and at most one child span
//! (the outbound call in flight):
//!
//! ```text
//!   Idle --parent()--> Parented --child()--> ChildActive --child()--> ChildActive
//!    ^                    |                      |
//!    +------finish()------+----------------------+
//! ```
//!
//! Opening a child while one is active ends the previous child first.
//! `finish` ends the child, then the parent, and is idempotent; dropping the
//! context finishes it, so spans are closed on every exit path.
//!
//! Inbound context is read from either `traceparent` (W3C) or
//! `uber-trace-id` (Jaeger), W3C winning when both are present. Outbound
//! requests carry both formats.

use std::fmt;
use std::sync::Arc;

use http::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::propagation::{
    Extractor, Injector, TextMapCompositePropagator, TextMapPropagator,
};
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{Sampler, SdkTracer, SdkTracerProvider};
use thiserror::Error;

const INSTRUMENTATION_NAME: &str = "traefik-tower";

/// Misuse of the span state machine
///
/// Never fatal: callers log it and carry on verifying.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceError {
    /// A child span was requested before any parent span was opened
    #[error("no parent span is open")]
    NoParent,

    /// A parent span was requested while one is already open
    #[error("a parent span is already open")]
    ParentAlreadyOpen,
}

/// Which of the two spans an annotation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanRole {
    Parent,
    Child,
}

/// Observable state of a [`TraceContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceState {
    Idle,
    Parented,
    ChildActive,
}

/// Shared tracer plus the W3C and Jaeger propagators
#[derive(Clone)]
pub struct TracerHandle {
    tracer: SdkTracer,
    propagator: Arc<TextMapCompositePropagator>,
    debug: bool,
}

/// Jaeger first so a W3C header, extracted last, takes precedence
fn composite_propagator() -> TextMapCompositePropagator {
    let propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>> = vec![
        Box::new(opentelemetry_jaeger_propagator::Propagator::new()),
        Box::new(TraceContextPropagator::new()),
    ];
    TextMapCompositePropagator::new(propagators)
}

impl TracerHandle {
    /// Wrap a tracer obtained from a configured provider
    pub fn new(tracer: SdkTracer) -> Self {
        Self {
            tracer,
            propagator: Arc::new(composite_propagator()),
            debug: false,
        }
    }

    /// Log every span start and end at debug level
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Tracer from `provider` under the service instrumentation name
    pub fn from_provider(provider: &SdkTracerProvider) -> Self {
        Self::new(provider.tracer(INSTRUMENTATION_NAME))
    }

    /// Tracer whose spans are never sampled
    ///
    /// Span contexts are still valid, so trace ids are generated and
    /// `traceparent` is still propagated to upstreams.
    pub fn noop() -> Self {
        let provider = SdkTracerProvider::builder()
            .with_sampler(Sampler::AlwaysOff)
            .build();
        Self::from_provider(&provider)
    }

    /// Fresh idle context for one inbound request
    pub fn context(&self) -> TraceContext {
        TraceContext {
            handle: self.clone(),
            phase: Phase::Idle,
        }
    }
}

impl fmt::Debug for TracerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerHandle")
            .field("propagator", &"tracecontext,jaeger")
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

enum Phase {
    Idle,
    Parented { parent: Context },
    ChildActive { parent: Context, child: Context },
}

/// Span pair for a single inbound request
pub struct TraceContext {
    handle: TracerHandle,
    phase: Phase,
}

impl TraceContext {
    /// Open the parent span for the inbound request
    ///
    /// Any upstream trace context found in `headers` becomes the remote
    /// parent. The span is named by `path`.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::ParentAlreadyOpen`] unless the context is idle;
    /// the state is left untouched in that case.
    pub fn parent(
        &mut self,
        method: &str,
        path: &str,
        headers: &HeaderMap,
    ) -> Result<(), TraceError> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(TraceError::ParentAlreadyOpen);
        }

        let upstream = self.handle.propagator.extract(&HeaderExtractor(headers));
        let span = self
            .handle
            .tracer
            .span_builder(path.to_string())
            .with_kind(SpanKind::Server)
            .with_attributes([KeyValue::new("http.request.method", method.to_string())])
            .start_with_context(&self.handle.tracer, &upstream);

        let parent = upstream.with_span(span);
        self.log_span("started", path, &parent);
        self.phase = Phase::Parented { parent };
        Ok(())
    }

    /// Open a child span for an outbound call
    ///
    /// An already active child is ended before the new one starts.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::NoParent`] when no parent span is open
    pub fn child(&mut self, name: &str) -> Result<(), TraceError> {
        let parent = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => return Err(TraceError::NoParent),
            Phase::Parented { parent } => parent,
            Phase::ChildActive { parent, child } => {
                self.end_span(&child);
                parent
            }
        };

        let span = self
            .handle
            .tracer
            .span_builder(name.to_string())
            .with_kind(SpanKind::Client)
            .start_with_context(&self.handle.tracer, &parent);
        let child = parent.with_span(span);
        self.log_span("started", name, &child);

        self.phase = Phase::ChildActive { parent, child };
        Ok(())
    }

    /// Record `http.method` and `http.url` on the chosen span
    pub fn ext_url(&self, role: SpanRole, method: &str, url: &str) {
        if let Some(cx) = self.span_context(role) {
            let span = cx.span();
            span.set_attribute(KeyValue::new("http.method", method.to_string()));
            span.set_attribute(KeyValue::new("http.url", url.to_string()));
        }
    }

    /// Record `http.status_code` on the chosen span
    pub fn ext_status(&self, role: SpanRole, status: u16) {
        if let Some(cx) = self.span_context(role) {
            cx.span()
                .set_attribute(KeyValue::new("http.status_code", i64::from(status)));
        }
    }

    /// Mark the chosen span as failed
    pub fn record_error(&self, role: SpanRole, message: &str) {
        if let Some(cx) = self.span_context(role) {
            cx.span().set_status(Status::error(message.to_string()));
        }
    }

    /// Write the active span's context into outbound `headers`
    ///
    /// The child span is used when one is active, otherwise the parent.
    /// Nothing is written while idle.
    pub fn inject(&self, headers: &mut HeaderMap) {
        let cx = match &self.phase {
            Phase::Idle => return,
            Phase::Parented { parent } => parent,
            Phase::ChildActive { child, .. } => child,
        };
        self.handle
            .propagator
            .inject_context(cx, &mut HeaderInjector(headers));
    }

    /// End the child span, then the parent span
    ///
    /// No-op when idle. After this the context can be parented again.
    pub fn finish(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => {}
            Phase::Parented { parent } => self.end_span(&parent),
            Phase::ChildActive { parent, child } => {
                self.end_span(&child);
                self.end_span(&parent);
            }
        }
    }

    pub fn state(&self) -> TraceState {
        match self.phase {
            Phase::Idle => TraceState::Idle,
            Phase::Parented { .. } => TraceState::Parented,
            Phase::ChildActive { .. } => TraceState::ChildActive,
        }
    }

    /// Hex trace id of the parent span, if one is open
    pub fn trace_id(&self) -> Option<String> {
        let cx = self.span_context(SpanRole::Parent)?;
        let span = cx.span();
        let span_context = span.span_context();
        span_context
            .is_valid()
            .then(|| span_context.trace_id().to_string())
    }

    fn end_span(&self, cx: &Context) {
        cx.span().end();
        self.log_span("ended", "", cx);
    }

    fn log_span(&self, event: &str, name: &str, cx: &Context) {
        if self.handle.debug {
            let span = cx.span();
            let span_context = span.span_context();
            tracing::debug!(
                trace_id = %span_context.trace_id(),
                span_id = %span_context.span_id(),
                sampled = span_context.is_sampled(),
                "span {} {}",
                event,
                name
            );
        }
    }

    fn span_context(&self, role: SpanRole) -> Option<&Context> {
        match (&self.phase, role) {
            (Phase::Parented { parent }, SpanRole::Parent)
            | (Phase::ChildActive { parent, .. }, SpanRole::Parent) => Some(parent),
            (Phase::ChildActive { child, .. }, SpanRole::Child) => Some(child),
            _ => None,
        }
    }
}

impl Drop for TraceContext {
    fn drop(&mut self) {
        self.finish();
    }
}

impl fmt::Debug for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceContext")
            .field("state", &self.state())
            .field("trace_id", &self.trace_id())
            .finish()
    }
}

/// Read-only view of inbound headers for the propagator
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}

/// Mutable view of outbound headers for the propagator
pub struct HeaderInjector<'a>(pub &'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        // an empty `tracestate` carries nothing
        if value.is_empty() {
            return;
        }
        let name = HeaderName::from_bytes(key.as_bytes());
        let value = HeaderValue::from_str(&value);
        if let (Ok(name), Ok(value)) = (name, value) {
            self.0.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::SpanId;
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SpanData};

    fn recording() -> (TracerHandle, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (TracerHandle::from_provider(&provider), exporter)
    }

    fn finished(exporter: &InMemorySpanExporter) -> Vec<SpanData> {
        exporter.get_finished_spans().unwrap()
    }

    fn attribute(span: &SpanData, key: &str) -> Option<String> {
        span.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.to_string())
    }

    #[test]
    fn test_new_context_is_idle() {
        let (handle, _) = recording();
        let trace = handle.context();
        assert_eq!(trace.state(), TraceState::Idle);
        assert!(trace.trace_id().is_none());
    }

    #[test]
    fn test_child_without_parent_is_rejected() {
        let (handle, exporter) = recording();
        let mut trace = handle.context();
        assert_eq!(trace.child("/oauth2/introspect"), Err(TraceError::NoParent));
        assert_eq!(trace.state(), TraceState::Idle);
        drop(trace);
        assert!(finished(&exporter).is_empty());
    }

    #[test]
    fn test_second_parent_is_rejected() {
        let (handle, _) = recording();
        let mut trace = handle.context();
        trace.parent("GET", "/", &HeaderMap::new()).unwrap();
        assert_eq!(
            trace.parent("GET", "/", &HeaderMap::new()),
            Err(TraceError::ParentAlreadyOpen)
        );
        assert_eq!(trace.state(), TraceState::Parented);
    }

    #[test]
    fn test_finish_ends_child_then_parent() {
        let (handle, exporter) = recording();
        let mut trace = handle.context();
        trace.parent("GET", "/", &HeaderMap::new()).unwrap();
        trace.child("/oauth2/introspect").unwrap();
        assert_eq!(trace.state(), TraceState::ChildActive);

        trace.finish();
        assert_eq!(trace.state(), TraceState::Idle);

        let spans = finished(&exporter);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "/oauth2/introspect");
        assert_eq!(spans[1].name, "/");
        assert_eq!(spans[0].parent_span_id, spans[1].span_context.span_id());
        assert_eq!(
            spans[0].span_context.trace_id(),
            spans[1].span_context.trace_id()
        );
    }

    #[test]
    fn test_finish_is_idempotent() {
        let (handle, exporter) = recording();
        let mut trace = handle.context();
        trace.parent("GET", "/", &HeaderMap::new()).unwrap();
        trace.finish();
        trace.finish();
        drop(trace);
        assert_eq!(finished(&exporter).len(), 1);
    }

    #[test]
    fn test_drop_finishes_open_spans() {
        let (handle, exporter) = recording();
        {
            let mut trace = handle.context();
            trace.parent("POST", "/", &HeaderMap::new()).unwrap();
            trace.child("/oauth2/userInfo").unwrap();
        }
        assert_eq!(finished(&exporter).len(), 2);
    }

    #[test]
    fn test_child_replacement_ends_previous_child() {
        let (handle, exporter) = recording();
        let mut trace = handle.context();
        trace.parent("GET", "/", &HeaderMap::new()).unwrap();
        trace.child("/oauth2/introspect").unwrap();
        trace.child("/clients/abc").unwrap();

        let spans = finished(&exporter);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "/oauth2/introspect");

        trace.finish();
        let names: Vec<_> = finished(&exporter)
            .iter()
            .map(|s| s.name.to_string())
            .collect();
        assert_eq!(names, vec!["/oauth2/introspect", "/clients/abc", "/"]);
    }

    #[test]
    fn test_reopen_after_finish_starts_new_trace() {
        let (handle, exporter) = recording();
        let mut trace = handle.context();
        trace.parent("GET", "/", &HeaderMap::new()).unwrap();
        let first = trace.trace_id().unwrap();
        trace.finish();

        trace.parent("GET", "/", &HeaderMap::new()).unwrap();
        let second = trace.trace_id().unwrap();
        trace.finish();

        assert_ne!(first, second);
        assert_eq!(finished(&exporter).len(), 2);
    }

    #[test]
    fn test_annotations_land_on_the_right_span() {
        let (handle, exporter) = recording();
        let mut trace = handle.context();
        trace.parent("GET", "/", &HeaderMap::new()).unwrap();
        trace.ext_url(SpanRole::Parent, "GET", "/");
        trace.ext_status(SpanRole::Child, 599);
        trace.child("/oauth2/introspect").unwrap();
        trace.ext_url(
            SpanRole::Child,
            "POST",
            "http://hydra/oauth2/introspect",
        );
        trace.ext_status(SpanRole::Child, 200);
        trace.ext_status(SpanRole::Parent, 401);
        trace.finish();

        let spans = finished(&exporter);
        let (child, parent) = (&spans[0], &spans[1]);
        assert_eq!(attribute(child, "http.method").as_deref(), Some("POST"));
        assert_eq!(
            attribute(child, "http.url").as_deref(),
            Some("http://hydra/oauth2/introspect")
        );
        assert_eq!(attribute(child, "http.status_code").as_deref(), Some("200"));
        assert_eq!(attribute(parent, "http.url").as_deref(), Some("/"));
        assert_eq!(attribute(parent, "http.status_code").as_deref(), Some("401"));
    }

    #[test]
    fn test_record_error_sets_status() {
        let (handle, exporter) = recording();
        let mut trace = handle.context();
        trace.parent("GET", "/", &HeaderMap::new()).unwrap();
        trace.record_error(SpanRole::Parent, "upstream unreachable");
        trace.finish();

        let spans = finished(&exporter);
        assert!(matches!(spans[0].status, Status::Error { .. }));
    }

    #[test]
    fn test_inject_writes_child_traceparent() {
        let (handle, exporter) = recording();
        let mut trace = handle.context();

        let mut headers = HeaderMap::new();
        trace.inject(&mut headers);
        assert!(headers.is_empty());

        trace.parent("GET", "/", &HeaderMap::new()).unwrap();
        trace.child("/oauth2/introspect").unwrap();
        trace.inject(&mut headers);
        trace.finish();

        let traceparent = headers["traceparent"].to_str().unwrap().to_string();
        let spans = finished(&exporter);
        let child = &spans[0];
        assert_eq!(
            traceparent,
            format!(
                "00-{}-{}-01",
                child.span_context.trace_id(),
                child.span_context.span_id()
            )
        );
    }

    #[test]
    fn test_parent_continues_upstream_trace() {
        let (handle, exporter) = recording();
        let mut inbound = HeaderMap::new();
        inbound.insert(
            "traceparent",
            HeaderValue::from_static("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"),
        );

        let mut trace = handle.context();
        trace.parent("GET", "/", &inbound).unwrap();
        assert_eq!(
            trace.trace_id().as_deref(),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );
        trace.finish();

        let spans = finished(&exporter);
        assert_eq!(
            spans[0].parent_span_id,
            SpanId::from_hex("00f067aa0ba902b7").unwrap()
        );
    }

    #[test]
    fn test_parent_continues_jaeger_trace() {
        let (handle, exporter) = recording();
        let mut inbound = HeaderMap::new();
        inbound.insert(
            "uber-trace-id",
            HeaderValue::from_static("4bf92f3577b34da6a3ce929d0e0e4736:00f067aa0ba902b7:0:1"),
        );

        let mut trace = handle.context();
        trace.parent("GET", "/", &inbound).unwrap();
        assert_eq!(
            trace.trace_id().as_deref(),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );

        trace.child("/oauth2/userInfo").unwrap();
        let mut outbound = HeaderMap::new();
        trace.inject(&mut outbound);
        trace.finish();

        let spans = finished(&exporter);
        let (child, parent) = (&spans[0], &spans[1]);
        assert_eq!(
            parent.parent_span_id,
            SpanId::from_hex("00f067aa0ba902b7").unwrap()
        );

        let jaeger = outbound["uber-trace-id"].to_str().unwrap();
        assert!(jaeger.starts_with(&format!(
            "4bf92f3577b34da6a3ce929d0e0e4736:{}:",
            child.span_context.span_id()
        )));
        let traceparent = outbound["traceparent"].to_str().unwrap();
        assert!(traceparent.contains("4bf92f3577b34da6a3ce929d0e0e4736"));
        assert!(!outbound.contains_key("tracestate"));
    }

    #[test]
    fn test_w3c_header_wins_over_jaeger() {
        let (handle, _exporter) = recording();
        let mut inbound = HeaderMap::new();
        inbound.insert(
            "traceparent",
            HeaderValue::from_static("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"),
        );
        inbound.insert(
            "uber-trace-id",
            HeaderValue::from_static("4bf92f3577b34da6a3ce929d0e0e4736:00f067aa0ba902b7:0:1"),
        );

        let mut trace = handle.context();
        trace.parent("GET", "/", &inbound).unwrap();
        assert_eq!(
            trace.trace_id().as_deref(),
            Some("0af7651916cd43dd8448eb211c80319c")
        );
    }

    #[test]
    fn test_noop_handle_still_propagates() {
        let handle = TracerHandle::noop();
        let mut trace = handle.context();
        trace.parent("GET", "/", &HeaderMap::new()).unwrap();
        trace.child("/oauth2/userInfo").unwrap();

        let mut headers = HeaderMap::new();
        trace.inject(&mut headers);
        assert!(headers.contains_key("traceparent"));
        assert!(trace.trace_id().is_some());
    }
}
