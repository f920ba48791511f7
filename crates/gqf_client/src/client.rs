//! The operation factory.
//!
//! [`GqfClient`] binds a [`Schema`] handle to a request handler and a
//! subscription transport. Its `define_*` methods classify a document up
//! front and return operation values that only execute when called.

use crate::async_data::{decode, AsyncData, AsyncDataCache, AsyncDataOptions, Resolver, Thunk};
use crate::config::ClientConfig;
use crate::context::OperationContext;
use crate::error::{ClientError, ClientResult};
use crate::handler::{HttpRequestHandler, RequestHandler};
use crate::key::OperationKey;
use crate::operation::{classify, OperationDescriptor};
use crate::registry::SessionRegistry;
use crate::schema::Schema;
use crate::session::{ChangeListener, Session, SessionSnapshot, SessionState};
use crate::transport::{SubscriptionTransport, TransportKind};
use crate::variables::Variables;
use futures_util::FutureExt;
use gqf_syntax::{print, EnumHelper, Gqf, OperationDocument, OperationType, TypedDocument};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// A document definition: a typed document or a closure that builds one.
pub trait IntoDocument<D, V> {
    fn into_document(self, gqf: &Gqf, enum_helper: &EnumHelper) -> ClientResult<TypedDocument<D, V>>;
}

impl<D, V> IntoDocument<D, V> for TypedDocument<D, V> {
    fn into_document(self, _gqf: &Gqf, _enum_helper: &EnumHelper) -> ClientResult<TypedDocument<D, V>> {
        Ok(self)
    }
}

impl<D, V, F> IntoDocument<D, V> for F
where
    F: FnOnce(&Gqf, &EnumHelper) -> ClientResult<TypedDocument<D, V>>,
{
    fn into_document(self, gqf: &Gqf, enum_helper: &EnumHelper) -> ClientResult<TypedDocument<D, V>> {
        self(gqf, enum_helper)
    }
}

/// Builds operations against one endpoint.
#[derive(Clone)]
pub struct GqfClient {
    schema: Schema,
    config: ClientConfig,
    endpoint: String,
    handler: Arc<dyn RequestHandler>,
    transport_kind: TransportKind,
    transport: Arc<dyn SubscriptionTransport>,
    registry: SessionRegistry,
    cache: AsyncDataCache,
}

impl GqfClient {
    /// Creates a client. The config's endpoint overrides the schema's.
    ///
    /// Fails with `MISSING_ENDPOINT` when neither names one.
    pub fn new(schema: Schema, config: ClientConfig) -> ClientResult<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .or_else(|| schema.endpoint().map(str::to_string))
            .ok_or_else(ClientError::missing_endpoint)?;

        if !config.known_endpoints.is_empty() && !config.known_endpoints.contains(&endpoint) {
            warn!(
                endpoint = %endpoint,
                known = ?config.known_endpoints,
                "endpoint is not one of the configured endpoints"
            );
        }

        let transport_kind = TransportKind::default();
        let transport = transport_kind.build(&config);
        Ok(Self {
            handler: Arc::new(HttpRequestHandler::new(&config)),
            schema,
            endpoint,
            transport_kind,
            transport,
            registry: SessionRegistry::new(),
            cache: AsyncDataCache::new(),
            config,
        })
    }

    pub fn with_request_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Selects the subscription transport.
    pub fn with_transport(mut self, kind: TransportKind) -> Self {
        self.transport = kind.build(&self.config);
        self.transport_kind = kind;
        self
    }

    /// Shares a session registry, so clients coalesce subscriptions.
    pub fn with_registry(mut self, registry: SessionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_cache(mut self, cache: AsyncDataCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &AsyncDataCache {
        &self.cache
    }

    fn resolve<D, V>(&self, def: impl IntoDocument<D, V>) -> ClientResult<(Arc<OperationDocument>, OperationType)> {
        let document = def.into_document(self.schema.gqf(), self.schema.enum_helper())?;
        let operation = classify(document.document())?;
        Ok((document.shared(), operation))
    }

    // =========================================================================
    // Definitions
    // =========================================================================

    /// Defines a query or mutation that runs the request handler on every
    /// call.
    pub fn define_operation<D, V>(
        &self,
        def: impl IntoDocument<D, V>,
        context: Option<OperationContext>,
    ) -> ClientResult<Operation<D, V>> {
        let (document, operation) = self.resolve(def)?;
        if operation == OperationType::Subscription {
            return Err(ClientError::wrong_operation_kind(
                operation,
                "use `define_subscription` for subscriptions",
            ));
        }
        debug!(operation = %operation, "defined operation");
        Ok(Operation {
            document,
            operation,
            url: self.endpoint.clone(),
            handler: Arc::clone(&self.handler),
            context: context.unwrap_or_default(),
            _marker: PhantomData,
        })
    }

    /// Defines a query whose results live in the async-data cache. Each
    /// call fetches unless the key is already cached.
    pub fn define_async_query<D, V>(
        &self,
        def: impl IntoDocument<D, V>,
        context: Option<OperationContext>,
    ) -> ClientResult<AsyncQuery<D, V>> {
        self.async_query(def, context, false)
    }

    /// Like [`define_async_query`](Self::define_async_query), but new
    /// entries wait for [`AsyncData::execute`].
    pub fn define_lazy_async_query<D, V>(
        &self,
        def: impl IntoDocument<D, V>,
        context: Option<OperationContext>,
    ) -> ClientResult<AsyncQuery<D, V>> {
        self.async_query(def, context, true)
    }

    fn async_query<D, V>(
        &self,
        def: impl IntoDocument<D, V>,
        context: Option<OperationContext>,
        lazy: bool,
    ) -> ClientResult<AsyncQuery<D, V>> {
        let (document, operation) = self.resolve(def)?;
        if operation != OperationType::Query {
            return Err(ClientError::wrong_operation_kind(
                operation,
                "async queries accept only `query` documents",
            ));
        }
        Ok(AsyncQuery {
            document,
            url: self.endpoint.clone(),
            handler: Arc::clone(&self.handler),
            cache: self.cache.clone(),
            context: context.unwrap_or_default(),
            lazy,
            _marker: PhantomData,
        })
    }

    /// Defines a subscription backed by a shared session per key.
    pub fn define_subscription<D, V>(
        &self,
        def: impl IntoDocument<D, V>,
        context: Option<OperationContext>,
    ) -> ClientResult<Subscription<D, V>> {
        let (document, operation) = self.resolve(def)?;
        if operation != OperationType::Subscription {
            return Err(ClientError::wrong_operation_kind(
                operation,
                "use `define_operation` or `define_async_query` instead",
            ));
        }
        debug!(transport = self.transport_kind.name(), "defined subscription");
        Ok(Subscription {
            document,
            url: self.endpoint.clone(),
            transport: Arc::clone(&self.transport),
            registry: self.registry.clone(),
            context: context.unwrap_or_default(),
            environment: self.config.environment,
            _marker: PhantomData,
        })
    }
}

impl fmt::Debug for GqfClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GqfClient")
            .field("endpoint", &self.endpoint)
            .field("transport", &self.transport_kind)
            .field("sessions", &self.registry.len())
            .finish()
    }
}

/// A query or mutation.
pub struct Operation<D, V> {
    document: Arc<OperationDocument>,
    operation: OperationType,
    url: String,
    handler: Arc<dyn RequestHandler>,
    context: OperationContext,
    _marker: PhantomData<fn(V) -> D>,
}

impl<D, V> Operation<D, V> {
    pub fn operation_type(&self) -> OperationType {
        self.operation
    }

    pub fn document(&self) -> &OperationDocument {
        &self.document
    }
}

impl<D, V> Operation<D, V>
where
    D: DeserializeOwned,
    V: Serialize + Send + Sync + 'static,
{
    /// Sends the operation. Nothing is cached or deduplicated.
    pub async fn call(
        &self,
        variables: impl Into<Variables<V>>,
        context: Option<OperationContext>,
    ) -> ClientResult<D> {
        let descriptor = OperationDescriptor::new(
            Arc::clone(&self.document),
            self.operation,
            variables.into().into_json()?,
            self.url.clone(),
        );
        let context = self.context.merged_with(context.as_ref());
        decode(self.handler.request(descriptor, context).await?)
    }
}

impl<D, V> Clone for Operation<D, V> {
    fn clone(&self) -> Self {
        Self {
            document: Arc::clone(&self.document),
            operation: self.operation,
            url: self.url.clone(),
            handler: Arc::clone(&self.handler),
            context: self.context.clone(),
            _marker: PhantomData,
        }
    }
}

impl<D, V> fmt::Debug for Operation<D, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("operation", &self.operation)
            .field("url", &self.url)
            .finish()
    }
}

/// A query bound to the async-data cache.
pub struct AsyncQuery<D, V> {
    document: Arc<OperationDocument>,
    url: String,
    handler: Arc<dyn RequestHandler>,
    cache: AsyncDataCache,
    context: OperationContext,
    lazy: bool,
    _marker: PhantomData<fn(V) -> D>,
}

impl<D, V> AsyncQuery<D, V> {
    pub fn is_lazy(&self) -> bool {
        self.lazy
    }
}

impl<D, V> AsyncQuery<D, V>
where
    D: DeserializeOwned,
    V: Serialize + Send + Sync + 'static,
{
    /// Returns the cache entry for these variables, fetching it first
    /// unless the query is lazy or already cached.
    ///
    /// A getter is read once per fetch. When its value changes, the next
    /// `refresh` or `execute` fetches into the entry of the new variables
    /// and the returned view follows it.
    pub async fn call(
        &self,
        variables: impl Into<Variables<V>>,
        options: AsyncDataOptions,
    ) -> ClientResult<AsyncData<D>> {
        let variables = variables.into().into_json_resolver();
        let context = self.context.merged_with(options.context.as_ref());
        let printed: Arc<str> = print(&self.document).into();

        let document = Arc::clone(&self.document);
        let handler = Arc::clone(&self.handler);
        let url = self.url.clone();
        let resolve: Resolver = Arc::new(move || -> ClientResult<(OperationKey, Thunk)> {
            let variables = variables()?;
            let key = OperationKey::from_printed(&printed, &variables);

            let document = Arc::clone(&document);
            let handler = Arc::clone(&handler);
            let url = url.clone();
            let context = context.clone();
            let thunk: Thunk = Arc::new(move || {
                let descriptor = OperationDescriptor::new(
                    Arc::clone(&document),
                    OperationType::Query,
                    variables.clone(),
                    url.clone(),
                );
                let handler = Arc::clone(&handler);
                let context = context.clone();
                async move { handler.request(descriptor, context).await }.boxed()
            });
            Ok((key, thunk))
        });

        let (key, thunk) = resolve()?;
        let options = AsyncDataOptions {
            lazy: options.lazy || self.lazy,
            context: options.context,
        };
        let entry = self.cache.get_or_create(key, thunk, &options).await;
        Ok(AsyncData::with_resolver(entry, self.cache.clone(), resolve))
    }
}

impl<D, V> fmt::Debug for AsyncQuery<D, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncQuery")
            .field("url", &self.url)
            .field("lazy", &self.lazy)
            .finish()
    }
}

/// A subscription definition.
pub struct Subscription<D, V> {
    document: Arc<OperationDocument>,
    url: String,
    transport: Arc<dyn SubscriptionTransport>,
    registry: SessionRegistry,
    context: OperationContext,
    environment: crate::config::Environment,
    _marker: PhantomData<fn(V) -> D>,
}

impl<D, V> Subscription<D, V>
where
    V: Serialize + Send + Sync + 'static,
{
    /// Joins the session for these variables, starting it if needed, and
    /// waits until it connects.
    ///
    /// Callers with equal documents and variables share one session and
    /// one connection. The context only applies when this call creates the
    /// session.
    pub async fn subscribe(
        &self,
        variables: impl Into<Variables<V>>,
        context: Option<OperationContext>,
    ) -> ClientResult<SubscriptionHandle<D>> {
        let variables = variables.into().into_json()?;
        let key = OperationKey::new(&self.document, &variables);

        let session = self.registry.get_or_create(key.clone(), || {
            let descriptor = OperationDescriptor::new(
                Arc::clone(&self.document),
                OperationType::Subscription,
                variables,
                self.url.clone(),
            );
            Session::new(
                key,
                descriptor,
                self.context.merged_with(context.as_ref()),
                Arc::clone(&self.transport),
                self.environment,
            )
        });

        session.ensure_started().await?;
        Ok(SubscriptionHandle {
            session,
            _marker: PhantomData,
        })
    }
}

impl<D, V> fmt::Debug for Subscription<D, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("url", &self.url)
            .field("environment", &self.environment)
            .finish()
    }
}

/// A caller's view of a subscription session.
///
/// Every handle on the same key sees the same state, and any handle's
/// `restart`, `refresh` or `unsubscribe` affects all of them.
pub struct SubscriptionHandle<D> {
    session: Arc<Session>,
    _marker: PhantomData<fn() -> D>,
}

impl<D> SubscriptionHandle<D> {
    pub fn key(&self) -> &OperationKey {
        self.session.key()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn data_value(&self) -> Option<Value> {
        self.session.data()
    }

    pub fn error(&self) -> Option<ClientError> {
        self.session.error()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.session.watch()
    }

    pub fn on_change<F>(&self, callback: F) -> ClientResult<ChangeListener>
    where
        F: FnMut(&SessionSnapshot) + Send + 'static,
    {
        self.session.on_change(callback)
    }

    pub fn unsubscribe(&self) {
        self.session.unsubscribe();
    }

    pub async fn restart(&self) -> ClientResult<()> {
        self.session.restart().await
    }

    pub async fn refresh(&self) -> ClientResult<()> {
        self.session.refresh().await
    }

    /// The underlying session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl<D: DeserializeOwned> SubscriptionHandle<D> {
    /// The latest result, decoded.
    pub fn data(&self) -> ClientResult<Option<D>> {
        self.data_value().map(decode).transpose()
    }
}

impl<D> Clone for SubscriptionHandle<D> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            _marker: PhantomData,
        }
    }
}

impl<D> fmt::Debug for SubscriptionHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SubscriptionHandle").field(&self.session).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::operation::RequestDescriptor;
    use async_trait::async_trait;
    use gqf_syntax::ast::Field;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RequestHandler for Echo {
        async fn request(
            &self,
            descriptor: RequestDescriptor,
            context: OperationContext,
        ) -> ClientResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({
                "variables": descriptor.variables,
                "tenant": context.get_header("x-tenant"),
            }))
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Echoed {
        variables: Value,
        tenant: Option<String>,
    }

    #[derive(Serialize)]
    struct ById {
        id: u32,
    }

    fn client(handler: Arc<Echo>) -> GqfClient {
        GqfClient::new(Schema::with_endpoint("http://localhost/graphql"), ClientConfig::default())
            .unwrap()
            .with_request_handler(handler)
    }

    #[test]
    fn test_missing_endpoint() {
        let err = GqfClient::new(Schema::new(), ClientConfig::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingEndpoint);

        let client = GqfClient::new(Schema::new(), ClientConfig::new("http://override/graphql")).unwrap();
        assert_eq!(client.endpoint(), "http://override/graphql");
    }

    #[test]
    fn test_config_endpoint_overrides_schema() {
        let client = GqfClient::new(
            Schema::with_endpoint("http://schema/graphql"),
            ClientConfig::new("http://config/graphql"),
        )
        .unwrap();
        assert_eq!(client.endpoint(), "http://config/graphql");
    }

    #[test]
    fn test_definition_kind_checks() {
        let client = client(Arc::default());
        let subscription = || TypedDocument::<Value, ()>::parse("subscription { tick }").unwrap();
        let query = || TypedDocument::<Value, ()>::parse("{ a }").unwrap();
        let mutation = || TypedDocument::<Value, ()>::parse("mutation { a }").unwrap();

        let err = client.define_operation(subscription(), None).unwrap_err();
        assert_eq!(err.code, ErrorCode::WrongOperationKind);
        assert!(client.define_operation(mutation(), None).is_ok());

        let err = client.define_async_query(mutation(), None).unwrap_err();
        assert_eq!(err.code, ErrorCode::WrongOperationKind);
        assert!(client.define_lazy_async_query(query(), None).unwrap().is_lazy());

        let err = client.define_subscription(query(), None).unwrap_err();
        assert_eq!(err.code, ErrorCode::WrongOperationKind);
        assert!(client.define_subscription(subscription(), None).is_ok());

        let err = client
            .define_operation(TypedDocument::<Value, ()>::parse("query A { a } query B { b }").unwrap(), None)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AmbiguousDocument);
    }

    #[test]
    fn test_builder_closure_errors_surface_at_definition() {
        let client = client(Arc::default());
        let err = client
            .define_operation(
                |gqf: &Gqf, _: &EnumHelper| -> ClientResult<TypedDocument<Value, ()>> {
                    Ok(gqf.parse("query {")?)
                },
                None,
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ParseError);
    }

    #[tokio::test]
    async fn test_operation_call_merges_context() {
        let handler = Arc::new(Echo::default());
        let client = client(Arc::clone(&handler));
        let operation = client
            .define_operation(
                |gqf: &Gqf, _: &EnumHelper| -> ClientResult<TypedDocument<Echoed, ById>> {
                    Ok(gqf.query().select(Field::new("user").argument("id", gqf_syntax::Value::variable("id"))).build())
                },
                Some(OperationContext::new().header("x-tenant", "base")),
            )
            .unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

        let echoed = operation.call(ById { id: 7 }, None).await.unwrap();
        assert_eq!(echoed.variables, json!({ "id": 7 }));
        assert_eq!(echoed.tenant.as_deref(), Some("base"));

        let echoed = operation
            .call(ById { id: 8 }, Some(OperationContext::new().header("x-tenant", "call")))
            .await
            .unwrap();
        assert_eq!(echoed.tenant.as_deref(), Some("call"));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_async_query_getter_is_read_per_fetch() {
        let handler = Arc::new(Echo::default());
        let client = client(Arc::clone(&handler));
        let query = client
            .define_lazy_async_query(TypedDocument::<Echoed, Value>::parse("{ a }").unwrap(), None)
            .unwrap();

        let current = Arc::new(AtomicUsize::new(1));
        let source = Arc::clone(&current);
        let data = query
            .call(
                Variables::getter(move || json!({ "page": source.load(Ordering::SeqCst) })),
                AsyncDataOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

        current.store(2, Ordering::SeqCst);
        let echoed = data.execute().await.unwrap();
        assert_eq!(echoed.variables, json!({ "page": 2 }));
    }
}
