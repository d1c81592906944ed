//! Client and bound remote methods.

use crate::cache::TtlCache;
use crate::descriptor::{MethodDescriptor, Operation, ParamShape, TransportKind};
use crate::error::{BindError, CallError, ClientError, RemoteError};
use crate::naming::NamingConvention;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use rpckit_protocol::{
    decode_message, encode_message, Id, Message, Params, ProtocolError, Request, Response,
};
use rpckit_transport::{Connection, Context};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound for each call, applied on top of the caller's context.
    pub request_timeout: Option<Duration>,
    /// TCP connect timeout for HTTP endpoints.
    pub connect_timeout: Duration,
    /// Periodically purge expired cache entries. Off by default.
    pub cache_sweep_interval: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            connect_timeout: Duration::from_secs(10),
            cache_sweep_interval: None,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn without_request_timeout(mut self) -> Self {
        self.request_timeout = None;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_cache_sweep_interval(mut self, interval: Duration) -> Self {
        self.cache_sweep_interval = Some(interval);
        self
    }
}

/// Builds a [`Client`].
pub struct ClientBuilder {
    name: String,
    connection: Option<Arc<Connection>>,
    url: Option<String>,
    naming: NamingConvention,
    namespace: Option<(String, String)>,
    headers: Vec<(String, String)>,
    config: ClientConfig,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("name", &self.name)
            .field("connection", &self.connection.is_some())
            .field("url", &self.url)
            .field("naming", &self.naming)
            .field("namespace", &self.namespace)
            .field("headers", &self.headers)
            .field("config", &self.config)
            .finish()
    }
}

impl ClientBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: None,
            url: None,
            naming: NamingConvention::default(),
            namespace: None,
            headers: Vec::new(),
            config: ClientConfig::default(),
        }
    }

    /// Sends JSON-RPC calls over an established connection.
    pub fn connection(mut self, conn: Arc<Connection>) -> Self {
        self.connection = Some(conn);
        self
    }

    /// HTTP endpoint. JSON-RPC calls are POSTed to `url` (unless a
    /// connection is also set) and REST calls go to `url/<name>`.
    pub fn http(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn naming(mut self, naming: NamingConvention) -> Self {
        self.naming = naming;
        self
    }

    /// Prefixes every method name with `namespace` followed by `separator`.
    pub fn namespace(mut self, namespace: impl Into<String>, separator: impl Into<String>) -> Self {
        self.namespace = Some((namespace.into(), separator.into()));
        self
    }

    /// Adds a header to every HTTP request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer_auth(self, token: impl std::fmt::Display) -> Self {
        self.header(AUTHORIZATION.as_str(), format!("Bearer {}", token))
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Client, BindError> {
        let http = match &self.url {
            Some(url) => Some(HttpBackend::new(url, &self.headers, &self.config)?),
            None => None,
        };

        let rpc: Arc<dyn RpcBackend> = match (&self.connection, &http) {
            (Some(conn), _) => Arc::new(ConnectionBackend { conn: conn.clone() }),
            (None, Some(http)) => Arc::new(http.clone()),
            (None, None) => return Err(BindError::NoBackend),
        };

        let cache = Arc::new(TtlCache::new());
        if let Some(interval) = self.config.cache_sweep_interval {
            tokio::runtime::Handle::try_current().map_err(|_| BindError::NoRuntime)?;
            cache.spawn_sweeper(interval);
        }

        let prefix = self
            .namespace
            .map(|(ns, sep)| format!("{}{}", ns, sep))
            .unwrap_or_default();

        tracing::debug!(
            "Client {} ready (rpc={}, rest={})",
            self.name,
            rpc.kind(),
            http.is_some()
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                name: self.name,
                naming: self.naming,
                prefix,
                rpc,
                rest: http,
                cache,
                config: self.config,
            }),
        })
    }
}

/// Binds declared operations to remote calls.
///
/// Cloning is cheap; clones share the endpoint and the result cache.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    name: String,
    naming: NamingConvention,
    prefix: String,
    rpc: Arc<dyn RpcBackend>,
    rest: Option<HttpBackend>,
    cache: Arc<TtlCache<Value>>,
    config: ClientConfig,
}

impl Client {
    pub fn builder(name: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Cached raw results, keyed by each method's cache key.
    pub fn cache(&self) -> &Arc<TtlCache<Value>> {
        &self.inner.cache
    }

    /// Resolves `op` against this client's naming settings without binding.
    pub fn describe(&self, op: &Operation) -> Result<MethodDescriptor, BindError> {
        MethodDescriptor::resolve(op, self.inner.naming, &self.inner.prefix)
    }

    /// Turns `op` into a callable taking `A` and returning `R`.
    ///
    /// Every setup problem is reported here; nothing about the declaration
    /// is checked again at call time.
    pub fn bind<A: Args, R: DeserializeOwned>(
        &self,
        op: Operation,
    ) -> Result<RemoteFn<A, R>, BindError> {
        let descriptor = self.describe(&op)?;
        if descriptor.transport == TransportKind::Rest && self.inner.rest.is_none() {
            return Err(BindError::NoRestBackend(descriptor.slot));
        }
        tracing::debug!(
            "{}: bound {} as {} ({})",
            self.inner.name,
            descriptor.slot,
            descriptor.name,
            descriptor.transport
        );
        Ok(RemoteFn {
            client: self.clone(),
            descriptor: Arc::new(descriptor),
            _marker: PhantomData,
        })
    }

    async fn invoke(
        &self,
        ctx: &Context,
        descriptor: &MethodDescriptor,
        param: Option<Value>,
    ) -> Result<Value, CallError> {
        let ctx = match self.inner.config.request_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        };

        match descriptor.transport {
            TransportKind::JsonRpc2 => {
                let params = pack_params(descriptor.shape, param)?;
                let (id, response) = self
                    .inner
                    .rpc
                    .exchange(&ctx, &descriptor.name, params)
                    .await?;
                if response.id.as_ref() != Some(&id) {
                    return Err(ClientError::IdMismatch {
                        expected: id,
                        actual: response.id,
                    }
                    .into());
                }
                response
                    .into_result()
                    .map_err(|e| RemoteError::Rpc(e).into())
            }
            TransportKind::Rest => {
                let http = self.inner.rest.as_ref().ok_or(ClientError::NoEndpoint)?;
                http.rest(&ctx, descriptor, param).await
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.inner.name)
            .field("naming", &self.inner.naming)
            .field("prefix", &self.inner.prefix)
            .finish()
    }
}

fn pack_params(shape: ParamShape, param: Option<Value>) -> Result<Option<Params>, ClientError> {
    match (shape, param) {
        (ParamShape::Array, param) => Ok(Some(Params::Array(param.into_iter().collect()))),
        (ParamShape::Object, None | Some(Value::Null)) => Ok(None),
        (ParamShape::Object, Some(Value::Object(map))) => Ok(Some(Params::Object(map))),
        (ParamShape::Object, Some(other)) => Err(ClientError::Params(format!(
            "object container needs a struct or map argument, got {}",
            other
        ))),
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for () {}
    impl<T> Sealed for (T,) {}
}

/// Argument list of a remote method: `()` or a single value `(T,)`.
pub trait Args: sealed::Sealed + Send + 'static {
    fn into_param(self) -> Result<Option<Value>, serde_json::Error>;
}

impl Args for () {
    fn into_param(self) -> Result<Option<Value>, serde_json::Error> {
        Ok(None)
    }
}

impl<T: Serialize + Send + 'static> Args for (T,) {
    fn into_param(self) -> Result<Option<Value>, serde_json::Error> {
        serde_json::to_value(self.0).map(Some)
    }
}

/// A bound remote method taking `A` and returning `R`.
pub struct RemoteFn<A, R> {
    client: Client,
    descriptor: Arc<MethodDescriptor>,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R> Clone for RemoteFn<A, R> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            descriptor: self.descriptor.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, R> std::fmt::Debug for RemoteFn<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFn")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl<A: Args, R: DeserializeOwned> RemoteFn<A, R> {
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub async fn call(&self, args: A) -> Result<R, CallError> {
        self.call_with(&Context::background(), args).await
    }

    /// Calls the remote method under `ctx`.
    ///
    /// A context that is already done fails before anything is sent. A live
    /// cache entry is returned without contacting the server; only successful
    /// results are cached.
    ///
    /// An empty REST body and a `"result": null` both decode from JSON
    /// `null`, which only `()`, `Option<T>` and `serde_json::Value` accept.
    /// Declare `Option<T>` for endpoints that may return nothing; any other
    /// `R` fails with [`ClientError::Decode`].
    pub async fn call_with(&self, ctx: &Context, args: A) -> Result<R, CallError> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        let descriptor = &*self.descriptor;
        let cache = &descriptor.cache;
        if cache.enabled {
            if let Some(value) = self.client.inner.cache.get(&cache.key) {
                tracing::debug!("{}: cache hit {}", self.client.inner.name, cache.key);
                return decode(value);
            }
        }

        let param = args.into_param().map_err(ClientError::Encode)?;
        let value = self.client.invoke(ctx, descriptor, param).await?;

        if !cache.enabled {
            return decode(value);
        }
        let result = decode(value.clone())?;
        self.client.inner.cache.save(&cache.key, value, cache.ttl);
        Ok(result)
    }
}

fn decode<R: DeserializeOwned>(value: Value) -> Result<R, CallError> {
    serde_json::from_value(value).map_err(|e| ClientError::Decode(e).into())
}

/// Carries JSON-RPC exchanges for a client.
#[async_trait]
trait RpcBackend: Send + Sync {
    /// Sends a call and returns the id it was sent with plus the response.
    async fn exchange(
        &self,
        ctx: &Context,
        method: &str,
        params: Option<Params>,
    ) -> Result<(Id, Response), CallError>;

    fn kind(&self) -> &'static str;
}

struct ConnectionBackend {
    conn: Arc<Connection>,
}

#[async_trait]
impl RpcBackend for ConnectionBackend {
    async fn exchange(
        &self,
        ctx: &Context,
        method: &str,
        params: Option<Params>,
    ) -> Result<(Id, Response), CallError> {
        let call = self.conn.call(ctx, method, params).await;
        let id = call.id().clone();
        let response = call.wait_response(ctx).await?;
        Ok((id, response))
    }

    fn kind(&self) -> &'static str {
        "connection"
    }
}

#[derive(Clone)]
struct HttpBackend {
    http: reqwest::Client,
    url: String,
    next_id: Arc<AtomicI64>,
}

impl HttpBackend {
    fn new(url: &str, headers: &[(String, String)], config: &ClientConfig) -> Result<Self, BindError> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| BindError::InvalidHeader(name.clone()))?;
            let value =
                HeaderValue::from_str(value).map_err(|_| BindError::InvalidHeader(name.clone()))?;
            map.insert(header, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(map)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            next_id: Arc::new(AtomicI64::new(1)),
        })
    }

    async fn rest(
        &self,
        ctx: &Context,
        descriptor: &MethodDescriptor,
        param: Option<Value>,
    ) -> Result<Value, CallError> {
        let url = format!("{}/{}", self.url, descriptor.name);
        tracing::debug!("{} {}", descriptor.verb, url);

        let mut request = self.http.request(descriptor.verb.clone(), url);
        if let Some(body) = &param {
            request = request.json(body);
        }
        let body = ctx.run(send(request)).await??;

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e).into())
    }
}

#[async_trait]
impl RpcBackend for HttpBackend {
    async fn exchange(
        &self,
        ctx: &Context,
        method: &str,
        params: Option<Params>,
    ) -> Result<(Id, Response), CallError> {
        let id = Id::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = Request {
            id: Some(id.clone()),
            method: method.to_string(),
            params,
        };
        let payload = encode_message(&request.into()).map_err(ClientError::from)?;
        tracing::debug!("POST {} id={} method={}", self.url, id, method);

        let builder = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload);
        let body = ctx.run(send(builder)).await??;

        match decode_message(&body).map_err(ClientError::from)? {
            Message::Response(response) => Ok((id, response)),
            Message::Request(_) => Err(ClientError::Protocol(ProtocolError::InvalidMessage(
                "expected a response".to_string(),
            ))
            .into()),
        }
    }

    fn kind(&self) -> &'static str {
        "http"
    }
}

async fn send(request: reqwest::RequestBuilder) -> Result<Bytes, CallError> {
    let response = request.send().await.map_err(ClientError::from)?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RemoteError::Status {
            status: status.as_u16(),
            body,
        }
        .into());
    }
    Ok(response.bytes().await.map_err(ClientError::from)?)
}
