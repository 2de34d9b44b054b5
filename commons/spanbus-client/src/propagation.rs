use opentelemetry::trace::{Link, SpanKind, TraceContextExt, Tracer};
use opentelemetry::{Context, global};

use crate::headers::Headers;
use crate::scope::{ActiveScope, CloseAction, OnCloseScope};
use crate::tags;

/// Scope-opening operations for message-bus producer and consumer
/// flows, available on any OpenTelemetry tracer whose spans can ride
/// in a [`Context`].
///
/// Both directions read the message headers through the global text
/// map propagator before the span starts, and write the new span's
/// context back into them so it can continue downstream. Extraction is
/// best effort: absent or malformed header entries never fail, the
/// span just starts without a remote relation.
pub trait TracerScopeExt: Tracer {
    /// Opens a `send` span for an outbound message.
    ///
    /// The span is a child of the context carried in `headers`, falling
    /// back to the caller's current context when they carry none, and a
    /// root span when there is no context anywhere. Closing the
    /// returned scope injects the span's context into the headers
    /// passed to close, then ends the span.
    fn start_producer_scope(&self, headers: &mut Headers) -> OnCloseScope;

    /// Opens a `receive` span for a consumed message.
    ///
    /// A context carried in `headers` becomes a link on the span, not a
    /// parent: the receive happens after and independently of the send.
    /// When the headers carry no context, no link is added and the span
    /// parents on the caller's current context, a root span when there
    /// is none. Injection happens on close, as with the producer scope.
    fn start_consumer_scope(&self, headers: &mut Headers) -> OnCloseScope;

    /// Variant of [`TracerScopeExt::start_consumer_scope`] that injects
    /// the span's context into `headers` immediately, so the message
    /// can propagate it downstream before processing finishes. The
    /// returned scope only ends the span on close. Both variants put
    /// identical trace and span ids into the headers.
    fn start_and_inject_consumer_scope(
        &self,
        headers: &mut Headers,
    ) -> ActiveScope;
}

impl<T> TracerScopeExt for T
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    fn start_producer_scope(&self, headers: &mut Headers) -> OnCloseScope {
        let parent_cx = extract_context(headers);
        let span = self
            .span_builder(tags::SPAN_NAME_SEND)
            .with_kind(SpanKind::Producer)
            .start_with_context(self, &parent_cx);
        let scope = ActiveScope::new(parent_cx.with_span(span));
        OnCloseScope::new(inject_on_close(), scope)
    }

    fn start_consumer_scope(&self, headers: &mut Headers) -> OnCloseScope {
        let scope = ActiveScope::new(consumer_context(self, headers));
        OnCloseScope::new(inject_on_close(), scope)
    }

    fn start_and_inject_consumer_scope(
        &self,
        headers: &mut Headers,
    ) -> ActiveScope {
        let scope = ActiveScope::new(consumer_context(self, headers));
        inject_context(scope.context(), headers);
        scope
    }
}

fn consumer_context<T>(tracer: &T, headers: &mut Headers) -> Context
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    let parent_cx = extract_context(headers);
    let remote = parent_cx.span().span_context().clone();

    let builder = tracer
        .span_builder(tags::SPAN_NAME_RECEIVE)
        .with_kind(SpanKind::Consumer);

    // Only a context genuinely carried by the headers becomes a link;
    // an ambient span on the polling task stays a parent, never a link.
    let span = if remote.is_valid() && remote.is_remote() {
        builder
            .with_links(vec![Link::with_context(remote)])
            .start_with_context(tracer, &Context::new())
    } else {
        builder.start_with_context(tracer, &parent_cx)
    };
    parent_cx.with_span(span)
}

fn extract_context(headers: &mut Headers) -> Context {
    global::get_text_map_propagator(|propagator| {
        propagator.extract(&headers.as_map())
    })
}

fn inject_context(cx: &Context, headers: &mut Headers) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(cx, &mut headers.as_map());
    });
}

fn inject_on_close() -> CloseAction {
    Box::new(|cx, headers| inject_context(cx, headers))
}
