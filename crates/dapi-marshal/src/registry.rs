//! Function registry: the lookup table behind call reconstruction.
//!
//! Every operation that may be shipped to another node is registered
//! here at startup. Decoding a [`FunctionRef`] is a table lookup; an
//! unregistered reference is a decode error, never a no-op.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use dapi_core::Arguments;

use crate::error::{MarshalError, MarshalResult};
use crate::function::{
    AppIdentity, AsyncHandler, BlockingHandler, BoxFuture, Function, FunctionKind, FunctionRef,
    Handler, HandlerResult, MethodHandler,
};

/// Module name recorded for methods bound to the application identity.
pub const APPLICATION_MODULE: &str = "application";

/// Qualified-name prefix for methods bound to the application identity.
const APPLICATION_CLASS: &str = "AppIdentity";

#[derive(Clone)]
enum Entry {
    Blocking(BlockingHandler),
    Async(AsyncHandler),
}

/// Registry of invocable operations, keyed by `(module, qualname)` for
/// functions and by method name for application methods.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<(String, String), Entry>,
    methods: HashMap<String, MethodHandler>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a blocking function. `qualname` may be nested
    /// (`"Agent.restart"`); its last segment is the function name.
    pub fn register_blocking<F>(&mut self, module: &str, qualname: &str, f: F) -> &mut Self
    where
        F: Fn(Arguments) -> HandlerResult + Send + Sync + 'static,
    {
        debug!(%module, %qualname, "registered blocking function");
        self.functions.insert(
            (module.to_string(), qualname.to_string()),
            Entry::Blocking(Arc::new(f)),
        );
        self
    }

    /// Register an async function.
    pub fn register_async<F, Fut>(&mut self, module: &str, qualname: &str, f: F) -> &mut Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        debug!(%module, %qualname, "registered async function");
        let handler: AsyncHandler =
            Arc::new(move |args: Arguments| -> BoxFuture<HandlerResult> { Box::pin(f(args)) });
        self.functions.insert(
            (module.to_string(), qualname.to_string()),
            Entry::Async(handler),
        );
        self
    }

    /// Register a method on the application identity.
    pub fn register_method<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&AppIdentity, Arguments) -> HandlerResult + Send + Sync + 'static,
    {
        debug!(%name, "registered application method");
        self.methods.insert(name.to_string(), Arc::new(f));
        self
    }

    /// Look up a registered function.
    pub fn function(&self, module: &str, qualname: &str) -> MarshalResult<Function> {
        let entry = self
            .functions
            .get(&(module.to_string(), qualname.to_string()))
            .ok_or_else(|| MarshalError::UnknownFunction {
                module: module.to_string(),
                qualname: qualname.to_string(),
            })?;

        let name = qualname.rsplit('.').next().unwrap_or(qualname);
        let reference = FunctionRef {
            name: name.to_string(),
            module: module.to_string(),
            qualname: qualname.to_string(),
            kind: FunctionKind::Function,
            receiver: None,
        };
        let handler = match entry {
            Entry::Blocking(f) => Handler::Blocking(f.clone()),
            Entry::Async(f) => Handler::Async(f.clone()),
        };
        Ok(Function::new(reference, handler, None))
    }

    /// Bind a registered application method to a receiver.
    pub fn method(&self, receiver: AppIdentity, name: &str) -> MarshalResult<Function> {
        let handler = self
            .methods
            .get(name)
            .ok_or_else(|| MarshalError::UnknownMethod(name.to_string()))?;

        let reference = FunctionRef {
            name: name.to_string(),
            module: APPLICATION_MODULE.to_string(),
            qualname: format!("{APPLICATION_CLASS}.{name}"),
            kind: FunctionKind::Method,
            receiver: Some(receiver.to_state()),
        };
        Ok(Function::new(
            reference,
            Handler::Method(handler.clone()),
            Some(Arc::new(receiver)),
        ))
    }

    /// Turn a wire reference back into an invocable function.
    pub fn resolve(&self, reference: &FunctionRef) -> MarshalResult<Function> {
        if let Some(state) = &reference.receiver {
            return self.method(AppIdentity::from_state(state), &reference.name);
        }
        if reference.kind == FunctionKind::Method {
            return Err(MarshalError::MissingReceiver(reference.to_string()));
        }

        let last = reference.qualname.rsplit('.').next().unwrap_or_default();
        if last != reference.name {
            return Err(MarshalError::Malformed(format!(
                "qualified name {} does not end in {}",
                reference.qualname, reference.name
            )));
        }
        self.function(&reference.module, &reference.qualname)
    }

    pub fn len(&self) -> usize {
        self.functions.len() + self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
