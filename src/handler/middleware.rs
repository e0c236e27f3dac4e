//! Middleware hooks around dispatch.
//!
//! Pre hooks see every `call`/`cast` before the function is resolved and may
//! rewrite it, answer it directly or reject it with a fault. Post hooks see
//! every result, including wire errors. Hooks run in registration order.
//!
//! Hooks are shared by all connections. Anything a hook needs to remember
//! about one connection goes in [`CallRequest::state`], which lives exactly
//! as long as that connection.
//!
//! # Example
//!
//! ```
//! use bertlet::codec::Term;
//! use bertlet::fault::Fault;
//! use bertlet::handler::{Middleware, PreHook};
//! use bertlet::protocol::CallRequest;
//!
//! struct DenyAdmin;
//!
//! impl Middleware for DenyAdmin {
//!     fn process_request(&self, request: CallRequest) -> Result<PreHook, Fault> {
//!         if request.module == "admin" {
//!             return Err(Fault::new("Forbidden", "admin is disabled"));
//!         }
//!         Ok(PreHook::Continue(request))
//!     }
//! }
//! ```

use std::sync::Arc;

use crate::codec::Term;
use crate::fault::Fault;
use crate::protocol::CallRequest;

/// Outcome of a pre hook.
#[derive(Debug, Clone, PartialEq)]
pub enum PreHook {
    /// Pass the (possibly rewritten) request to the next hook.
    Continue(CallRequest),
    /// Skip the function and answer with this term as-is.
    Respond(Term),
}

/// A pre/post hook pair. Both default to pass-through.
pub trait Middleware: Send + Sync + 'static {
    /// Inspect or rewrite a request before dispatch.
    fn process_request(&self, request: CallRequest) -> Result<PreHook, Fault> {
        Ok(PreHook::Continue(request))
    }

    /// Inspect or rewrite a result (a value or a wire error).
    fn process_response(&self, response: Term) -> Term {
        response
    }
}

/// Ordered list of middleware.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    hooks: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware.
    pub fn push(&mut self, middleware: impl Middleware) {
        self.hooks.push(Arc::new(middleware));
    }

    /// Append a shared middleware.
    pub fn push_arc(&mut self, middleware: Arc<dyn Middleware>) {
        self.hooks.push(middleware);
    }

    /// Number of middleware.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// True if the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run pre hooks until one responds or faults.
    pub fn run_pre(&self, mut request: CallRequest) -> Result<PreHook, Fault> {
        for hook in &self.hooks {
            match hook.process_request(request)? {
                PreHook::Continue(next) => request = next,
                respond @ PreHook::Respond(_) => return Ok(respond),
            }
        }
        Ok(PreHook::Continue(request))
    }

    /// Run every post hook over `response`.
    pub fn run_post(&self, response: Term) -> Term {
        self.hooks
            .iter()
            .fold(response, |acc, hook| hook.process_response(acc))
    }
}
