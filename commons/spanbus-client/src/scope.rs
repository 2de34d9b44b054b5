use opentelemetry::trace::{SpanRef, TraceContextExt};
use opentelemetry::{Context, ContextGuard};

use crate::headers::Headers;

/// An open span with an explicit close lifecycle.
///
/// The span ends exactly once: on the first [`ActiveScope::close`], or
/// on drop when the caller never closed it, so no span leaks on early
/// return or panic. Reads through [`ActiveScope::span`] stay valid
/// after close; writes after close are ignored by the span.
pub struct ActiveScope {
    cx: Context,
    closed: bool,
}

impl ActiveScope {
    pub(crate) fn new(cx: Context) -> Self {
        Self { cx, closed: false }
    }

    /// Context carrying the span, for wiring into async flows with
    /// `opentelemetry::trace::FutureExt::with_context`.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// Span handle for tagging and inspection.
    pub fn span(&self) -> SpanRef<'_> {
        self.cx.span()
    }

    /// Makes the span current on this thread until the returned guard
    /// drops. For synchronous callers; async flows go through
    /// [`ActiveScope::context`] instead.
    pub fn attach(&self) -> ContextGuard {
        self.cx.clone().attach()
    }

    /// Ends the span. Closing an already-closed scope is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cx.span().end();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for ActiveScope {
    fn drop(&mut self) {
        self.close();
    }
}

/// Action run when an [`OnCloseScope`] closes, receiving the scope's
/// context and the header collection bound at the close site.
pub type CloseAction = Box<dyn FnOnce(&Context, &mut Headers) + Send>;

/// Wraps an [`ActiveScope`] so a side effect runs exactly once at close
/// time, before the span ends.
///
/// The headers are passed to [`OnCloseScope::close`] rather than
/// captured at creation: the message owning them must stay usable by
/// the underlying send while the scope is open. Closing twice runs
/// neither the action nor the span end a second time. If the action
/// panics, the inner scope still ends the span during unwind.
pub struct OnCloseScope {
    on_close: Option<CloseAction>,
    inner: ActiveScope,
}

impl OnCloseScope {
    pub fn new(on_close: CloseAction, inner: ActiveScope) -> Self {
        Self {
            on_close: Some(on_close),
            inner,
        }
    }

    /// Context carrying the span, see [`ActiveScope::context`].
    pub fn context(&self) -> &Context {
        self.inner.context()
    }

    /// Span handle, valid before and after close.
    pub fn span(&self) -> SpanRef<'_> {
        self.inner.span()
    }

    /// Makes the span current on this thread, see
    /// [`ActiveScope::attach`].
    pub fn attach(&self) -> ContextGuard {
        self.inner.attach()
    }

    /// Runs the close action against `headers`, then ends the span.
    pub fn close(&mut self, headers: &mut Headers) {
        if let Some(action) = self.on_close.take() {
            action(self.inner.context(), headers);
        }
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl Drop for OnCloseScope {
    fn drop(&mut self) {
        if self.on_close.is_some() {
            tracing::warn!(
                "scope dropped before close, span context was not written \
                 to message headers"
            );
        }
    }
}
