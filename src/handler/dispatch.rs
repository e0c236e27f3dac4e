//! Request dispatch: middleware, resolution, invocation, fault translation.
//!
//! [`Dispatcher::dispatch`] never fails. Every fault raised by a pre hook,
//! by module/function resolution or by the function itself is turned into a
//! wire error term here, then passed through the post hooks like any other
//! result.

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use super::middleware::{MiddlewareChain, PreHook};
use super::registry::{Handler, HandlerResult, ModuleRegistry};
use crate::codec::{atoms, Term};
use crate::fault::Fault;
use crate::protocol::{CallKind, CallRequest};

/// `(reply, Value)`.
pub fn reply(value: Term) -> Term {
    Term::tuple(vec![Term::atom(atoms::REPLY), value])
}

/// `(noreply,)`.
pub fn noreply() -> Term {
    Term::tuple(vec![Term::atom(atoms::NOREPLY)])
}

/// What dispatch produced before post hooks and wrapping.
enum Outcome {
    /// Function return value, wrapped in `reply` for calls.
    Value(Term),
    /// Pre hook answer, sent unwrapped.
    Respond(Term),
    /// Any fault, sent as a wire error.
    Fault(Fault),
}

/// Resolves and runs requests against a shared registry.
///
/// Cheap to clone; clones share the registry and middleware.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ModuleRegistry>,
    middleware: Arc<MiddlewareChain>,
    call_timeout: Option<Duration>,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(registry: Arc<ModuleRegistry>, middleware: MiddlewareChain) -> Self {
        Self {
            registry,
            middleware: Arc::new(middleware),
            call_timeout: None,
        }
    }

    /// Bound each invocation. `None` waits indefinitely.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Shared registry.
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Dispatch one request and build the response term.
    ///
    /// For `call` this is `(reply, Value)`, a pre hook's verbatim answer, or
    /// a wire error. For `cast` it is always `(noreply,)`; the outcome is
    /// only logged.
    pub async fn dispatch(&self, request: CallRequest) -> Term {
        let kind = request.kind;
        let module = request.module.clone();
        let function = request.function.clone();

        let outcome = self.execute(request).await;

        if kind == CallKind::Cast {
            match &outcome {
                Outcome::Fault(fault) => {
                    tracing::warn!(%module, %function, %fault, "cast failed");
                }
                _ => tracing::debug!(%module, %function, "cast completed"),
            }
        }

        let response = match outcome {
            Outcome::Value(value) => reply(self.middleware.run_post(value)),
            Outcome::Respond(term) => self.middleware.run_post(term),
            Outcome::Fault(fault) => {
                if kind == CallKind::Call {
                    tracing::debug!(%module, %function, %fault, "call failed");
                }
                self.middleware.run_post(fault.to_wire_term())
            }
        };

        match kind {
            CallKind::Call => response,
            CallKind::Cast => noreply(),
        }
    }

    async fn execute(&self, request: CallRequest) -> Outcome {
        let request = match self.middleware.run_pre(request) {
            Ok(PreHook::Continue(request)) => request,
            Ok(PreHook::Respond(term)) => return Outcome::Respond(term),
            Err(fault) => return Outcome::Fault(fault),
        };

        let handler = match self.registry.resolve(&request.module, &request.function) {
            Ok(handler) => handler,
            Err(fault) => return Outcome::Fault(fault),
        };

        match self.invoke(handler, request).await {
            Ok(value) => Outcome::Value(value),
            Err(fault) => Outcome::Fault(fault),
        }
    }

    /// Run the function in its own task so a panic is contained.
    async fn invoke(&self, handler: Arc<dyn Handler>, request: CallRequest) -> HandlerResult {
        let span = tracing::debug_span!(
            "invoke",
            module = %request.module,
            function = %request.function,
        );
        let task = tokio::spawn(handler.call(request.args).instrument(span));
        let abort = task.abort_handle();

        let joined = match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return Err(Fault::timeout(
                        &request.module,
                        &request.function,
                        limit.as_millis(),
                    ));
                }
            },
            None => task.await,
        };

        joined.unwrap_or_else(|err| Err(Fault::from_join_error(err)))
    }
}
