//! Function references and the invocable handles they resolve to.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use dapi_core::{Arguments, DomainError};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// What an invocable operation returns: the `data` payload or a domain error.
pub type HandlerResult = Result<Value, DomainError>;

pub(crate) type BlockingHandler = Arc<dyn Fn(Arguments) -> HandlerResult + Send + Sync>;
pub(crate) type AsyncHandler = Arc<dyn Fn(Arguments) -> BoxFuture<HandlerResult> + Send + Sync>;
pub(crate) type MethodHandler = Arc<dyn Fn(&AppIdentity, Arguments) -> HandlerResult + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    /// Free function or static method, resolved by module and qualified name.
    Function,
    /// Method bound to a receiver rebuilt from its embedded state.
    Method,
}

/// Install path assumed when a receiver's state omits it.
pub const DEFAULT_INSTALL_PATH: &str = "/var/ossec";

fn default_install_path() -> PathBuf {
    PathBuf::from(DEFAULT_INSTALL_PATH)
}

/// Reconstructable state of a bound receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReceiverState {
    Application {
        #[serde(default = "default_install_path")]
        path: PathBuf,
    },
}

/// Wire reference to an invocable operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRef {
    pub name: String,
    pub module: String,
    pub qualname: String,
    #[serde(rename = "type")]
    pub kind: FunctionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<ReceiverState>,
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.qualname)
    }
}

/// The top-level application identity that bound methods hang off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub install_path: PathBuf,
}

impl AppIdentity {
    pub fn new(install_path: impl Into<PathBuf>) -> Self {
        Self {
            install_path: install_path.into(),
        }
    }

    pub fn to_state(&self) -> ReceiverState {
        ReceiverState::Application {
            path: self.install_path.clone(),
        }
    }

    pub fn from_state(state: &ReceiverState) -> Self {
        match state {
            ReceiverState::Application { path } => Self::new(path.clone()),
        }
    }
}

#[derive(Clone)]
pub(crate) enum Handler {
    Blocking(BlockingHandler),
    Async(AsyncHandler),
    Method(MethodHandler),
}

/// A resolved, invocable operation together with the reference that
/// names it on the wire.
#[derive(Clone)]
pub struct Function {
    reference: FunctionRef,
    handler: Handler,
    receiver: Option<Arc<AppIdentity>>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("reference", &self.reference)
            .field("blocking", &self.is_blocking())
            .finish()
    }
}

impl Function {
    pub(crate) fn new(
        reference: FunctionRef,
        handler: Handler,
        receiver: Option<Arc<AppIdentity>>,
    ) -> Self {
        Self {
            reference,
            handler,
            receiver,
        }
    }

    pub fn reference(&self) -> &FunctionRef {
        &self.reference
    }

    /// Whether the handler is plain blocking code that should be kept off
    /// the async scheduler.
    pub fn is_blocking(&self) -> bool {
        !matches!(self.handler, Handler::Async(_))
    }

    /// Invoke the handler on the current thread.
    ///
    /// Async handlers cannot be driven from here and yield an internal error.
    pub fn call_blocking(&self, arguments: Arguments) -> HandlerResult {
        match &self.handler {
            Handler::Blocking(f) => f(arguments),
            Handler::Method(f) => match &self.receiver {
                Some(receiver) => f(receiver, arguments),
                None => Err(DomainError::internal(format!(
                    "method {} has no bound receiver",
                    self.reference
                ))),
            },
            Handler::Async(_) => Err(DomainError::internal(format!(
                "{} is async and cannot be called blocking",
                self.reference
            ))),
        }
    }

    /// Invoke the handler as a future. Blocking handlers run inline when
    /// the future is polled.
    pub fn call(&self, arguments: Arguments) -> BoxFuture<HandlerResult> {
        match &self.handler {
            Handler::Async(f) => f(arguments),
            _ => {
                let this = self.clone();
                Box::pin(async move { this.call_blocking(arguments) })
            }
        }
    }
}
