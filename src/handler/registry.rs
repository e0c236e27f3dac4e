//! Module registry for dispatching requests by `(module, function)`.
//!
//! A [`Module`] is a named table of functions built once at registration
//! time. The [`ModuleRegistry`] maps registered names to modules and may be
//! extended while the server is running.
//!
//! # Example
//!
//! ```
//! use bertlet::codec::Term;
//! use bertlet::handler::{Module, ModuleRegistry};
//!
//! let math = Module::new("app.math").function("double", |args: Vec<Term>| async move {
//!     let n = args.first().and_then(Term::as_integer).unwrap_or(0);
//!     Ok(Term::from(n * 2))
//! });
//!
//! let registry = ModuleRegistry::new();
//! assert_eq!(registry.register(math), "math");
//! assert!(registry.resolve("math", "double").is_ok());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use crate::codec::Term;
use crate::fault::Fault;

/// Result type for registered functions.
pub type HandlerResult = std::result::Result<Term, Fault>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for callable functions.
pub trait Handler: Send + Sync + 'static {
    /// Invoke with positional arguments.
    fn call(&self, args: Vec<Term>) -> BoxFuture<'static, HandlerResult>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct HandlerFn<F, Fut>
where
    F: Fn(Vec<Term>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> HandlerFn<F, Fut>
where
    F: Fn(Vec<Term>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Wrap a closure.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Handler for HandlerFn<F, Fut>
where
    F: Fn(Vec<Term>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, args: Vec<Term>) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(args))
    }
}

/// A named namespace of functions.
#[derive(Clone)]
pub struct Module {
    /// Full identifier, e.g. `app.math`.
    identifier: String,
    /// Functions by name.
    functions: HashMap<String, Arc<dyn Handler>>,
}

impl Module {
    /// Create an empty module.
    ///
    /// The identifier may be a dotted path; it registers under its last
    /// component unless a name is given explicitly.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            functions: HashMap::new(),
        }
    }

    /// Add an async closure as a function (builder style).
    pub fn function<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Vec<Term>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.add(name, HandlerFn::new(handler));
        self
    }

    /// Add any [`Handler`] implementation. Replaces an existing entry.
    pub fn add(&mut self, name: &str, handler: impl Handler) {
        self.functions.insert(name.to_string(), Arc::new(handler));
    }

    /// Full identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Registration name: the identifier's last dotted component.
    pub fn default_name(&self) -> &str {
        self.identifier
            .rsplit('.')
            .next()
            .unwrap_or(&self.identifier)
    }

    /// Look up a public function.
    ///
    /// Names starting with `_` are private and never resolve.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        if name.starts_with('_') {
            return None;
        }
        self.functions.get(name).cloned()
    }

    /// Names of all functions, including private ones.
    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.function_names().collect();
        names.sort_unstable();
        f.debug_struct("Module")
            .field("identifier", &self.identifier)
            .field("functions", &names)
            .finish()
    }
}

/// Registry mapping names to modules.
///
/// Entries are only added or overwritten. Lookups clone an `Arc` and release
/// the lock immediately.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Arc<Module>>>,
}

impl ModuleRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the module's default name. Returns that name.
    pub fn register(&self, module: Module) -> String {
        let name = module.default_name().to_string();
        self.register_as(module, &name);
        name
    }

    /// Register under an explicit name, overwriting any previous entry.
    pub fn register_as(&self, module: Module, name: &str) {
        let mut modules = self.modules.write().unwrap_or_else(|e| e.into_inner());
        if modules.insert(name.to_string(), Arc::new(module)).is_some() {
            tracing::debug!(module = name, "replaced registered module");
        }
    }

    /// Get a module by registered name.
    pub fn get(&self, name: &str) -> Option<Arc<Module>> {
        let modules = self.modules.read().unwrap_or_else(|e| e.into_inner());
        modules.get(name).cloned()
    }

    /// Resolve a function, or the fault the client should see.
    pub fn resolve(&self, module: &str, function: &str) -> Result<Arc<dyn Handler>, Fault> {
        let module = self.get(module).ok_or_else(Fault::invalid_module)?;
        module.get(function).ok_or_else(Fault::invalid_function)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let modules = self.modules.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = modules.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.modules.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> Module {
        Module::new("echo")
            .function("echo", |args: Vec<Term>| async move { Ok(Term::list(args)) })
            .function("_secret", |_| async { Ok(Term::from(0)) })
    }

    #[test]
    fn test_default_name_strips_dotted_prefix() {
        assert_eq!(Module::new("app.services.math").default_name(), "math");
        assert_eq!(Module::new("math").default_name(), "math");
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = ModuleRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.register(echo()), "echo");
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("echo", "echo").is_ok());
    }

    #[test]
    fn test_register_as() {
        let registry = ModuleRegistry::new();
        registry.register_as(echo(), "mirror");
        assert!(registry.get("echo").is_none());
        assert_eq!(registry.get("mirror").unwrap().identifier(), "echo");
    }

    #[test]
    fn test_reregister_overwrites() {
        let registry = ModuleRegistry::new();
        registry.register(echo());
        registry.register(Module::new("other.echo"));
        assert_eq!(registry.names(), vec!["echo".to_string()]);
        assert_eq!(registry.get("echo").unwrap().identifier(), "other.echo");
    }

    #[test]
    fn test_resolution_faults() {
        let registry = ModuleRegistry::new();
        registry.register(echo());

        let fault = registry.resolve("missing", "echo").err().unwrap();
        assert_eq!((fault.name(), fault.code()), ("InvalidModule", 1));

        let fault = registry.resolve("echo", "nope").err().unwrap();
        assert_eq!((fault.name(), fault.code()), ("InvalidFunction", 2));
    }

    #[test]
    fn test_underscore_functions_are_private() {
        let module = echo();
        assert!(module.function_names().any(|n| n == "_secret"));
        assert!(module.get("_secret").is_none());

        let registry = ModuleRegistry::new();
        registry.register(module);
        let fault = registry.resolve("echo", "_secret").err().unwrap();
        assert_eq!(fault.name(), "InvalidFunction");
    }

    #[tokio::test]
    async fn test_handler_invocation() {
        let registry = ModuleRegistry::new();
        registry.register(echo());
        let handler = registry.resolve("echo", "echo").ok().unwrap();
        let result = handler.call(vec![Term::from(1), Term::from("a")]).await;
        assert_eq!(
            result.unwrap(),
            Term::list(vec![Term::from(1), Term::from("a")])
        );
    }

    #[test]
    fn test_debug_lists_functions() {
        let rendered = format!("{:?}", echo());
        assert!(rendered.contains("_secret"));
        assert!(rendered.contains("\"echo\""));
    }
}
