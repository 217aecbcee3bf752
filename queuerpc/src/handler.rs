//! Handler objects bound to server sessions.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use queuerpc_core::RemoteError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Something that can serve calls on a session.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use queuerpc::Handler;
/// use queuerpc_core::RemoteError;
/// use serde_json::Value;
///
/// struct Echo;
///
/// #[async_trait(?Send)]
/// impl Handler for Echo {
///     fn has_method(&self, method: &str) -> bool {
///         method == "echo"
///     }
///
///     async fn invoke(&self, method: &str, args: Value) -> Result<Value, RemoteError> {
///         match method {
///             "echo" => Ok(args),
///             other => Err(RemoteError::method_not_found(other)),
///         }
///     }
/// }
/// ```
#[async_trait(?Send)]
pub trait Handler: 'static {
    /// Whether `method` can be invoked.
    fn has_method(&self, method: &str) -> bool;

    /// Run `method` with `args`.
    async fn invoke(&self, method: &str, args: Value) -> Result<Value, RemoteError>;
}

#[async_trait(?Send)]
impl<H: Handler + ?Sized> Handler for Rc<H> {
    fn has_method(&self, method: &str) -> bool {
        (**self).has_method(method)
    }

    async fn invoke(&self, method: &str, args: Value) -> Result<Value, RemoteError> {
        (**self).invoke(method, args).await
    }
}

type BoxedMethod = Box<dyn Fn(Value) -> LocalBoxFuture<'static, Result<Value, RemoteError>>>;

/// A [`Handler`] built from named async closures with typed arguments.
///
/// Arguments are decoded from JSON into the closure's argument type; a
/// decode failure is answered with an `InvalidArguments` error.
///
/// ```rust
/// use queuerpc::MethodTable;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Mul {
///     a: i64,
///     b: i64,
/// }
///
/// let table = MethodTable::new()
///     .with_method("echo", |args: serde_json::Value| async move { Ok(args) })
///     .with_method("mul", |Mul { a, b }| async move { Ok(a * b) });
/// assert_eq!(table.len(), 2);
/// ```
#[derive(Default)]
pub struct MethodTable {
    methods: HashMap<String, BoxedMethod>,
}

impl MethodTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, replacing any previous method with that name.
    pub fn register<A, R, F, Fut>(&mut self, name: impl Into<String>, method: F)
    where
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> Fut + 'static,
        Fut: Future<Output = Result<R, RemoteError>> + 'static,
    {
        let name = name.into();
        let method_name = name.clone();
        let boxed: BoxedMethod = Box::new(move |args: Value| {
            match serde_json::from_value::<A>(args) {
                Ok(args) => {
                    let call = method(args);
                    async move {
                        let result = call.await?;
                        serde_json::to_value(result)
                            .map_err(|e| RemoteError::new("SerializationError", e.to_string()))
                    }
                    .boxed_local()
                }
                Err(e) => {
                    let error = RemoteError::invalid_arguments(&method_name, e);
                    async move { Err(error) }.boxed_local()
                }
            }
        });
        self.methods.insert(name, boxed);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_method<A, R, F, Fut>(mut self, name: impl Into<String>, method: F) -> Self
    where
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> Fut + 'static,
        Fut: Future<Output = Result<R, RemoteError>> + 'static,
    {
        self.register(name, method);
        self
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether no method is registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Registered method names, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.method_names())
            .finish()
    }
}

#[async_trait(?Send)]
impl Handler for MethodTable {
    fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    async fn invoke(&self, method: &str, args: Value) -> Result<Value, RemoteError> {
        match self.methods.get(method) {
            Some(call) => call(args).await,
            None => Err(RemoteError::method_not_found(method)),
        }
    }
}
