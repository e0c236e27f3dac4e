//! Handler module - module registry, middleware and dispatch.
//!
//! Provides:
//! - [`ModuleRegistry`] - maps module names to function tables
//! - [`Middleware`] - pre/post hooks around every call and cast
//! - [`Dispatcher`] - runs a request and translates faults to wire errors
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bertlet::codec::Term;
//! use bertlet::handler::{reply, Dispatcher, MiddlewareChain, Module, ModuleRegistry};
//! use bertlet::protocol::CallRequest;
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let registry = Arc::new(ModuleRegistry::new());
//! registry.register(Module::new("m").function("double", |args: Vec<Term>| async move {
//!     let n = args.first().and_then(Term::as_integer).unwrap_or(0);
//!     Ok(Term::from(n * 2))
//! }));
//!
//! let dispatcher = Dispatcher::new(registry, MiddlewareChain::new());
//! let response = dispatcher
//!     .dispatch(CallRequest::call("m", "double", vec![Term::from(21)]))
//!     .await;
//! assert_eq!(response, reply(Term::from(42)));
//! # });
//! ```

mod dispatch;
mod middleware;
mod registry;

pub use dispatch::{noreply, reply, Dispatcher};
pub use middleware::{Middleware, MiddlewareChain, PreHook};
pub use registry::{BoxFuture, Handler, HandlerFn, HandlerResult, Module, ModuleRegistry};
