//! Service registry and dispatcher.
//!
//! A service is a named group of typed async methods. Incoming method names
//! are split on `.` or `_`: exactly two fields select `(service, method)`.
//! Any other shape, or a service that lacks the method, falls back to the
//! default service looked up with the whole name. Lookups ignore case.

use crate::error::{MethodError, RegistryError};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use rpckit_protocol::{Params, Request, WireError};
use rpckit_transport::{Connection, Context, Handler, HandlerError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Name under which the default service is registered.
pub const DEFAULT_SERVICE: &str = "_default";

type MethodFn =
    Arc<dyn Fn(Context, Option<Params>) -> BoxFuture<'static, Result<Value, WireError>> + Send + Sync>;

#[derive(Clone)]
struct Method {
    name: String,
    call: MethodFn,
}

/// A named set of methods, created with [`Service::builder`].
pub struct Service {
    name: String,
    methods: HashMap<String, Method>,
}

impl Service {
    pub fn builder(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Method names as registered, sorted.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.values().map(|m| m.name.clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.method_names())
            .finish()
    }
}

pub struct ServiceBuilder {
    name: String,
    methods: Vec<Method>,
}

impl ServiceBuilder {
    /// Adds a method taking one parameter of type `P`.
    ///
    /// Positional params decode element 0 into `P` (an absent or empty list
    /// decodes from `null`, so `P = ()` or `Option<_>` accepts no argument);
    /// keyed params decode as a whole.
    pub fn method<P, R, F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Context, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
    {
        let name = name.into();
        let f = Arc::new(f);
        let call: MethodFn = Arc::new(move |ctx: Context, params: Option<Params>| {
            let f = f.clone();
            async move {
                let arg: P = decode_param(params)?;
                let result = f(ctx, arg).await.map_err(MethodError::into_wire)?;
                serde_json::to_value(result)
                    .map_err(|e| WireError::internal(format!("failed to encode result: {}", e)))
            }
            .boxed()
        });
        self.methods.push(Method { name, call });
        self
    }

    /// Validates the builder and produces the service.
    pub fn build(self) -> Result<Service, RegistryError> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.methods.is_empty() {
            return Err(RegistryError::NoMethods(self.name));
        }

        let mut methods = HashMap::with_capacity(self.methods.len());
        for method in self.methods {
            if method.name.is_empty() {
                return Err(RegistryError::InvalidMethodName(method.name));
            }
            let key = method.name.to_lowercase();
            if methods.contains_key(&key) {
                return Err(RegistryError::DuplicateMethod {
                    service: self.name,
                    method: method.name,
                });
            }
            methods.insert(key, method);
        }

        Ok(Service {
            name: self.name,
            methods,
        })
    }
}

fn decode_param<P: DeserializeOwned>(params: Option<Params>) -> Result<P, WireError> {
    let value = match params {
        None => Value::Null,
        Some(Params::Array(items)) => items.into_iter().next().unwrap_or(Value::Null),
        Some(Params::Object(map)) => Value::Object(map),
    };
    serde_json::from_value(value).map_err(|e| WireError::invalid_params(e.to_string()))
}

/// Registered services, keyed by lowercased name.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<String, Arc<Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service under its own name.
    ///
    /// Method names of named services may not contain `.` or `_`, since
    /// those separate the service from the method on the wire.
    pub fn register(&self, service: ServiceBuilder) -> Result<(), RegistryError> {
        let service = service.build()?;
        if let Some(method) = service.methods.values().find(|m| m.name.contains(['.', '_'])) {
            return Err(RegistryError::InvalidMethodName(method.name.clone()));
        }
        self.insert(service)
    }

    /// Registers the methods of `service` as the default service, reachable
    /// by bare method name.
    pub fn register_default(&self, service: ServiceBuilder) -> Result<(), RegistryError> {
        let mut service = service.build()?;
        service.name = DEFAULT_SERVICE.to_string();
        self.insert(service)
    }

    fn insert(&self, service: Service) -> Result<(), RegistryError> {
        use dashmap::mapref::entry::Entry;

        let name = service.name.clone();
        match self.services.entry(name.to_lowercase()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateService(name)),
            Entry::Vacant(slot) => {
                tracing::debug!(
                    "Registered service {} ({} methods)",
                    name,
                    service.methods.len()
                );
                slot.insert(Arc::new(service));
                Ok(())
            }
        }
    }

    /// Lists every callable name, sorted. Default-service methods are listed
    /// bare, others as `service.method`.
    pub fn describe(&self) -> Vec<String> {
        let mut names = Vec::new();
        for entry in self.services.iter() {
            let service = entry.value();
            for method in service.method_names() {
                if service.name == DEFAULT_SERVICE {
                    names.push(method);
                } else {
                    names.push(format!("{}.{}", service.name, method));
                }
            }
        }
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    fn resolve(&self, method: &str) -> Option<MethodFn> {
        let fields: Vec<&str> = method.split(['.', '_']).filter(|f| !f.is_empty()).collect();
        if let [service, name] = fields.as_slice() {
            let found = self
                .services
                .get(&service.to_lowercase())
                .and_then(|svc| svc.methods.get(&name.to_lowercase()).map(|m| m.call.clone()));
            if found.is_some() {
                return found;
            }
        }

        self.services
            .get(DEFAULT_SERVICE)
            .and_then(|svc| svc.methods.get(&method.to_lowercase()).map(|m| m.call.clone()))
    }

    /// Invokes `method` with `params`.
    ///
    /// Returns [`HandlerError::NotHandled`] when no method matches. A panic
    /// inside the method is reported as an internal error.
    pub async fn dispatch(
        &self,
        ctx: Context,
        method: &str,
        params: Option<Params>,
    ) -> Result<Value, HandlerError> {
        let call = self.resolve(method).ok_or(HandlerError::NotHandled)?;

        match AssertUnwindSafe(call(ctx, params)).catch_unwind().await {
            Ok(result) => result.map_err(HandlerError::Rpc),
            Err(_) => {
                tracing::error!("Method {} panicked", method);
                Err(HandlerError::Rpc(WireError::internal(format!(
                    "method {} panicked",
                    method
                ))))
            }
        }
    }
}

#[async_trait]
impl Handler for ServiceRegistry {
    async fn handle(
        &self,
        _conn: Arc<Connection>,
        ctx: Context,
        request: Request,
    ) -> Result<Value, HandlerError> {
        self.dispatch(ctx, &request.method, request.params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpckit_protocol::ErrorCode;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Pair {
        a: i64,
        b: i64,
    }

    fn arith() -> ServiceBuilder {
        Service::builder("Arith")
            .method("Add", |_ctx, p: Pair| async move { Ok(p.a + p.b) })
            .method("Neg", |_ctx, n: i64| async move { Ok(-n) })
            .method("Zero", |_ctx, _: ()| async move { Ok(0) })
            .method("Boom", |_ctx, _: ()| async move {
                if true {
                    panic!("boom");
                }
                Ok(())
            })
            .method("Fail", |_ctx, _: ()| async move {
                Err::<(), _>(MethodError::failed("nope"))
            })
    }

    fn registry() -> ServiceRegistry {
        let registry = ServiceRegistry::new();
        registry.register(arith()).unwrap();
        registry
            .register_default(
                Service::builder("Misc")
                    .method("echo", |_ctx, v: Value| async move { Ok(v) }),
            )
            .unwrap();
        registry
    }

    async fn call(registry: &ServiceRegistry, method: &str, params: Value) -> Result<Value, HandlerError> {
        let params = Params::from_value(params).unwrap();
        registry.dispatch(Context::background(), method, params).await
    }

    fn wire_code(result: Result<Value, HandlerError>) -> ErrorCode {
        match result {
            Err(HandlerError::Rpc(e)) => e.code,
            other => panic!("expected wire error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_positional_and_keyed() {
        let registry = registry();
        assert_eq!(call(&registry, "Arith.Neg", json!([5])).await.unwrap(), json!(-5));
        assert_eq!(
            call(&registry, "Arith.Add", json!({"a": 2, "b": 3})).await.unwrap(),
            json!(5)
        );
        assert_eq!(
            call(&registry, "Arith.Add", json!([{"a": 1, "b": 1}])).await.unwrap(),
            json!(2)
        );
    }

    #[tokio::test]
    async fn test_dispatch_case_insensitive_and_separators() {
        let registry = registry();
        assert_eq!(call(&registry, "arith.neg", json!([1])).await.unwrap(), json!(-1));
        assert_eq!(call(&registry, "ARITH_NEG", json!([1])).await.unwrap(), json!(-1));
    }

    #[tokio::test]
    async fn test_no_params_decode_from_null() {
        let registry = registry();
        assert_eq!(call(&registry, "Arith.Zero", Value::Null).await.unwrap(), json!(0));
        assert_eq!(call(&registry, "Arith.Zero", json!([])).await.unwrap(), json!(0));
    }

    #[tokio::test]
    async fn test_default_service_fallback() {
        let registry = registry();
        assert_eq!(call(&registry, "echo", json!(["x"])).await.unwrap(), json!("x"));
        assert_eq!(call(&registry, "ECHO", json!([1])).await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_not_handled() {
        let registry = registry();
        assert!(matches!(
            call(&registry, "Arith.Mul", json!([])).await,
            Err(HandlerError::NotHandled)
        ));
        assert!(matches!(
            call(&registry, "Nope.Add", json!([])).await,
            Err(HandlerError::NotHandled)
        ));
        assert!(matches!(
            call(&registry, "a.b.c", json!([])).await,
            Err(HandlerError::NotHandled)
        ));
    }

    #[tokio::test]
    async fn test_bad_params_are_invalid_params() {
        let registry = registry();
        let code = wire_code(call(&registry, "Arith.Neg", json!(["not a number"])).await);
        assert_eq!(code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_method_errors_and_panics() {
        let registry = registry();
        assert_eq!(
            wire_code(call(&registry, "Arith.Fail", Value::Null).await),
            ErrorCode::UNKNOWN_ERROR
        );
        assert_eq!(
            wire_code(call(&registry, "Arith.Boom", Value::Null).await),
            ErrorCode::INTERNAL_ERROR
        );
        // Still usable after a panic.
        assert_eq!(call(&registry, "Arith.Neg", json!([2])).await.unwrap(), json!(-2));
    }

    #[test]
    fn test_registration_errors() {
        let registry = registry();
        assert_eq!(
            registry.register(arith()),
            Err(RegistryError::DuplicateService("Arith".into()))
        );
        assert_eq!(
            registry.register(Service::builder("")),
            Err(RegistryError::EmptyName)
        );
        assert_eq!(
            registry.register(Service::builder("Empty")),
            Err(RegistryError::NoMethods("Empty".into()))
        );
        assert!(matches!(
            registry.register(
                Service::builder("Dup")
                    .method("get", |_ctx, _: ()| async move { Ok(1) })
                    .method("GET", |_ctx, _: ()| async move { Ok(2) })
            ),
            Err(RegistryError::DuplicateMethod { .. })
        ));
        assert!(matches!(
            registry.register(
                Service::builder("Bad").method("get_all", |_ctx, _: ()| async move { Ok(1) })
            ),
            Err(RegistryError::InvalidMethodName(_))
        ));
    }

    #[test]
    fn test_describe() {
        let registry = registry();
        assert_eq!(
            registry.describe(),
            vec![
                "Arith.Add",
                "Arith.Boom",
                "Arith.Fail",
                "Arith.Neg",
                "Arith.Zero",
                "echo",
            ]
        );
        assert_eq!(registry.len(), 2);
    }
}
