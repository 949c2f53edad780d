use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::{
    error::{HandlerError, JsonRpcError, JsonRpcErrorObject},
    error_codes,
    gate::ConcurrencyGate,
    mapping::map_error,
    notification::JsonRpcNotification,
    request::JsonRpcRequest,
    response::{JsonRpcMessage, ResponseResult},
    types::RequestId,
};

/// Result type returned by handlers
pub type JsonRpcResult<T> = Result<T, HandlerError>;

/// Per-request dispatch context, created right before the handler runs
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Id of the request being served
    pub id: RequestId,
    /// Method being invoked
    pub method: String,
    /// When dispatch started (after the concurrency gate admitted the request)
    pub start_time: Instant,
}

impl RequestContext {
    pub fn new(id: RequestId, method: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into(),
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Which dispatch a hook error came from
#[derive(Debug, Clone, Copy)]
pub enum DispatchTarget<'a> {
    Request(&'a RequestContext),
    Notification(&'a JsonRpcNotification),
}

impl DispatchTarget<'_> {
    pub fn method(&self) -> &str {
        match self {
            DispatchTarget::Request(ctx) => &ctx.method,
            DispatchTarget::Notification(n) => &n.method,
        }
    }
}

/// Handles one request method
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Produce the `result` for a request, or a domain error the dispatcher maps
    async fn handle(&self, request: JsonRpcRequest, ctx: RequestContext) -> JsonRpcResult<Value>;
}

/// Handles one notification method
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, notification: JsonRpcNotification) -> JsonRpcResult<()>;
}

/// Optional lifecycle hooks run around every dispatch.
///
/// All methods default to no-ops.
#[async_trait]
pub trait DispatchHooks: Send + Sync {
    /// Runs after the gate admits a request and before its handler.
    /// Returning an error short-circuits dispatch into an error response.
    async fn before_request(
        &self,
        _request: &JsonRpcRequest,
        _ctx: &RequestContext,
    ) -> JsonRpcResult<()> {
        Ok(())
    }

    /// Runs with the final response; may rewrite it.
    /// The id is restored afterwards so correlation cannot be broken.
    async fn after_request(&self, _ctx: &RequestContext, _response: &mut JsonRpcMessage) {}

    /// Returning an error skips the notification handler.
    async fn before_notification(&self, _notification: &JsonRpcNotification) -> JsonRpcResult<()> {
        Ok(())
    }

    async fn after_notification(&self, _notification: &JsonRpcNotification) {}

    /// Called for every handler or hook failure. For requests, a returned
    /// object with a reserved code replaces the mapped error; for
    /// notifications it is ignored.
    async fn on_error(
        &self,
        _error: &HandlerError,
        _target: DispatchTarget<'_>,
    ) -> Option<JsonRpcErrorObject> {
        None
    }
}

/// Adapts an async closure into a [`RequestHandler`]
pub struct FunctionHandler<F, Fut> {
    handler_fn: F,
    _marker: PhantomData<fn() -> Fut>,
}

/// Wrap a closure `Fn(JsonRpcRequest, RequestContext) -> Future<Output = JsonRpcResult<Value>>`.
pub fn request_fn<F, Fut>(handler_fn: F) -> FunctionHandler<F, Fut>
where
    F: Fn(JsonRpcRequest, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = JsonRpcResult<Value>> + Send,
{
    FunctionHandler {
        handler_fn,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> RequestHandler for FunctionHandler<F, Fut>
where
    F: Fn(JsonRpcRequest, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = JsonRpcResult<Value>> + Send,
{
    async fn handle(&self, request: JsonRpcRequest, ctx: RequestContext) -> JsonRpcResult<Value> {
        (self.handler_fn)(request, ctx).await
    }
}

/// Adapts an async closure into a [`NotificationHandler`]
pub struct NotificationFunctionHandler<F, Fut> {
    handler_fn: F,
    _marker: PhantomData<fn() -> Fut>,
}

/// Wrap a closure `Fn(JsonRpcNotification) -> Future<Output = JsonRpcResult<()>>`.
pub fn notification_fn<F, Fut>(handler_fn: F) -> NotificationFunctionHandler<F, Fut>
where
    F: Fn(JsonRpcNotification) -> Fut + Send + Sync,
    Fut: Future<Output = JsonRpcResult<()>> + Send,
{
    NotificationFunctionHandler {
        handler_fn,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> NotificationHandler for NotificationFunctionHandler<F, Fut>
where
    F: Fn(JsonRpcNotification) -> Fut + Send + Sync,
    Fut: Future<Output = JsonRpcResult<()>> + Send,
{
    async fn handle(&self, notification: JsonRpcNotification) -> JsonRpcResult<()> {
        (self.handler_fn)(notification).await
    }
}

/// Method registry plus the dispatch rules around it.
///
/// Built once, then shared read-only (usually behind an `Arc`) by every
/// connection. Requests pass through the [`ConcurrencyGate`]; notifications
/// never do.
pub struct JsonRpcDispatcher {
    pub request_handlers: HashMap<String, Arc<dyn RequestHandler>>,
    pub notification_handlers: HashMap<String, Arc<dyn NotificationHandler>>,
    hooks: Option<Arc<dyn DispatchHooks>>,
    gate: ConcurrencyGate,
    request_timeout: Option<Duration>,
}

impl JsonRpcDispatcher {
    pub fn new() -> Self {
        Self::with_gate(ConcurrencyGate::default())
    }

    pub fn with_gate(gate: ConcurrencyGate) -> Self {
        Self {
            request_handlers: HashMap::new(),
            notification_handlers: HashMap::new(),
            hooks: None,
            gate,
            request_timeout: None,
        }
    }

    /// Register a handler for a specific request method
    pub fn register_method<H>(&mut self, method: impl Into<String>, handler: H)
    where
        H: RequestHandler + 'static,
    {
        self.request_handlers.insert(method.into(), Arc::new(handler));
    }

    /// Register one handler for several request methods
    pub fn register_methods<H>(&mut self, methods: Vec<String>, handler: H)
    where
        H: RequestHandler + 'static,
    {
        let handler_arc: Arc<dyn RequestHandler> = Arc::new(handler);
        for method in methods {
            self.request_handlers.insert(method, Arc::clone(&handler_arc));
        }
    }

    /// Register a handler for a specific notification method
    pub fn register_notification<H>(&mut self, method: impl Into<String>, handler: H)
    where
        H: NotificationHandler + 'static,
    {
        self.notification_handlers
            .insert(method.into(), Arc::new(handler));
    }

    pub fn set_hooks<H>(&mut self, hooks: H)
    where
        H: DispatchHooks + 'static,
    {
        self.hooks = Some(Arc::new(hooks));
    }

    /// Give up on requests whose handler runs longer than `timeout`.
    /// Off by default: without it a stuck handler holds its gate slot forever.
    pub fn set_request_timeout(&mut self, timeout: Option<Duration>) {
        self.request_timeout = timeout;
    }

    /// Swap the gate; only meaningful before the dispatcher is shared.
    pub fn set_gate(&mut self, gate: ConcurrencyGate) {
        self.gate = gate;
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Process a JSON-RPC request and return its one response
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcMessage {
        let _permit = self.gate.acquire().await;
        let ctx = RequestContext::new(request.id.clone(), request.method.clone());
        debug!(method = %ctx.method, id = %ctx.id, active = self.gate.active(), "dispatching request");

        let outcome = match &self.hooks {
            Some(hooks) => match hooks.before_request(&request, &ctx).await {
                Ok(()) => self.invoke(request, &ctx).await,
                Err(err) => Err(Some(err)),
            },
            None => self.invoke(request, &ctx).await,
        };

        let mut response = match outcome {
            Ok(result) => JsonRpcMessage::success(ctx.id.clone(), ResponseResult::from(result)),
            Err(Some(err)) => JsonRpcMessage::error(self.request_error(&err, &ctx).await),
            Err(None) => JsonRpcMessage::error(JsonRpcError::method_not_found(ctx.id.clone())),
        };

        if let Some(hooks) = &self.hooks {
            hooks.after_request(&ctx, &mut response).await;
            restore_id(&mut response, &ctx.id);
        }

        debug!(
            method = %ctx.method,
            id = %ctx.id,
            elapsed_ms = ctx.elapsed().as_millis() as u64,
            is_error = response.is_error(),
            "request complete"
        );
        response
    }

    /// Run the registered handler. `Err(None)` means no handler exists.
    async fn invoke(
        &self,
        request: JsonRpcRequest,
        ctx: &RequestContext,
    ) -> Result<Value, Option<HandlerError>> {
        let Some(handler) = self.request_handlers.get(&request.method) else {
            debug!(method = %request.method, "no handler registered");
            return Err(None);
        };

        let call = AssertUnwindSafe(handler.handle(request, ctx.clone())).catch_unwind();
        let outcome = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(Some(HandlerError::Rpc(timeout_error(limit))));
                }
            },
            None => call.await,
        };

        match outcome {
            Ok(result) => result.map_err(Some),
            Err(panic) => {
                error!(method = %ctx.method, id = %ctx.id, "request handler panicked: {}", panic_message(&*panic));
                Err(Some(HandlerError::Rpc(JsonRpcErrorObject::internal_error(None))))
            }
        }
    }

    async fn request_error(&self, err: &HandlerError, ctx: &RequestContext) -> JsonRpcError {
        warn!(method = %ctx.method, id = %ctx.id, error = %err, "request failed");
        let replacement = match &self.hooks {
            Some(hooks) => hooks
                .on_error(err, DispatchTarget::Request(ctx))
                .await
                .filter(JsonRpcErrorObject::has_reserved_code),
            None => None,
        };
        let object = replacement.unwrap_or_else(|| map_error(err));
        JsonRpcError::new(Some(ctx.id.clone()), object)
    }

    /// Process a JSON-RPC notification. Never produces a response.
    pub async fn handle_notification(&self, notification: JsonRpcNotification) {
        let Some(handler) = self.notification_handlers.get(&notification.method) else {
            debug!(method = %notification.method, "ignoring notification without handler");
            return;
        };

        if let Some(hooks) = &self.hooks
            && let Err(err) = hooks.before_notification(&notification).await
        {
            self.notification_error(&err, &notification).await;
            return;
        }

        let call = AssertUnwindSafe(handler.handle(notification.clone())).catch_unwind();
        match call.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.notification_error(&err, &notification).await,
            Err(panic) => {
                error!(method = %notification.method, "notification handler panicked: {}", panic_message(&*panic));
            }
        }

        if let Some(hooks) = &self.hooks {
            hooks.after_notification(&notification).await;
        }
    }

    async fn notification_error(&self, err: &HandlerError, notification: &JsonRpcNotification) {
        if let Some(hooks) = &self.hooks {
            let _ = hooks
                .on_error(err, DispatchTarget::Notification(notification))
                .await;
        }
        warn!(method = %notification.method, error = %err, "notification handler failed");
    }

    /// Get all registered request and notification methods
    pub fn registered_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self
            .request_handlers
            .keys()
            .chain(self.notification_handlers.keys())
            .cloned()
            .collect();
        methods.sort();
        methods.dedup();
        methods
    }
}

impl Default for JsonRpcDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn restore_id(response: &mut JsonRpcMessage, id: &RequestId) {
    match response {
        JsonRpcMessage::Response(resp) => resp.id = id.clone(),
        JsonRpcMessage::Error(err) => err.id = Some(id.clone()),
    }
}

fn timeout_error(limit: Duration) -> JsonRpcErrorObject {
    JsonRpcErrorObject {
        code: error_codes::REQUEST_TIMEOUT,
        message: format!("Request timed out after {}ms", limit.as_millis()),
        data: None,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use serde_json::json;
    use tokio::sync::Mutex;

    struct EchoHandler;

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(&self, request: JsonRpcRequest, ctx: RequestContext) -> JsonRpcResult<Value> {
            assert_eq!(request.id, ctx.id);
            Ok(request.params.map(|p| p.to_value()).unwrap_or(Value::Null))
        }
    }

    struct PanicHandler;

    #[async_trait]
    impl RequestHandler for PanicHandler {
        async fn handle(&self, _request: JsonRpcRequest, _ctx: RequestContext) -> JsonRpcResult<Value> {
            panic!("kaboom")
        }
    }

    fn ping_dispatcher() -> JsonRpcDispatcher {
        let mut dispatcher = JsonRpcDispatcher::new();
        dispatcher.register_method(
            "ping",
            request_fn(|_req, _ctx| async { Ok::<_, HandlerError>(json!({"ok": true})) }),
        );
        dispatcher
    }

    #[tokio::test]
    async fn test_dispatcher_success() {
        let dispatcher = ping_dispatcher();
        let request = JsonRpcRequest::new_no_params(RequestId::from(1), "ping");

        let response = dispatcher.handle_request(request).await;
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}})
        );
    }

    #[tokio::test]
    async fn test_dispatcher_method_not_found() {
        let dispatcher = ping_dispatcher();
        let request = JsonRpcRequest::new_no_params(RequestId::from(2), "missing");

        let response = dispatcher.handle_request(request).await;
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"jsonrpc": "2.0", "id": 2, "error": {"code": -32601, "message": "Method not found"}})
        );
    }

    #[tokio::test]
    async fn test_handler_error_is_mapped() {
        let mut dispatcher = JsonRpcDispatcher::new();
        dispatcher.register_method(
            "fail",
            request_fn(|_req, _ctx| async { Err::<Value, _>(HandlerError::other("backend unavailable")) }),
        );

        let response = dispatcher
            .handle_request(JsonRpcRequest::new_no_params(RequestId::from("x"), "fail"))
            .await;
        assert_eq!(response.id(), Some(&RequestId::from("x")));
        assert_eq!(response.error_code(), Some(error_codes::UPSTREAM_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_echo_params_and_null_result() {
        let mut dispatcher = JsonRpcDispatcher::new();
        dispatcher.register_method("echo", EchoHandler);

        let response = dispatcher
            .handle_request(JsonRpcRequest::new_no_params(RequestId::Null, "echo"))
            .await;
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"jsonrpc": "2.0", "id": null, "result": null})
        );
    }

    #[tokio::test]
    async fn test_panicking_handler_still_answers_and_releases() {
        let mut dispatcher = JsonRpcDispatcher::with_gate(ConcurrencyGate::new(1));
        dispatcher.register_method("explode", PanicHandler);

        let response = dispatcher
            .handle_request(JsonRpcRequest::new_no_params(RequestId::from(5), "explode"))
            .await;
        assert_eq!(response.error_code(), Some(error_codes::INTERNAL_ERROR));
        assert_eq!(dispatcher.gate().active(), 0);
    }

    #[tokio::test]
    async fn test_request_timeout_releases_slot() {
        let mut dispatcher = JsonRpcDispatcher::with_gate(ConcurrencyGate::new(1));
        dispatcher.set_request_timeout(Some(Duration::from_millis(20)));
        dispatcher.register_method(
            "hang",
            request_fn(|_req, _ctx| async {
                futures::future::pending::<()>().await;
                Ok::<_, HandlerError>(Value::Null)
            }),
        );

        let response = dispatcher
            .handle_request(JsonRpcRequest::new_no_params(RequestId::from(6), "hang"))
            .await;
        assert_eq!(response.error_code(), Some(error_codes::REQUEST_TIMEOUT));
        assert_eq!(dispatcher.gate().active(), 0);
    }

    struct RecordingHooks {
        events: Arc<Mutex<Vec<String>>>,
        deny: &'static str,
    }

    #[async_trait]
    impl DispatchHooks for RecordingHooks {
        async fn before_request(&self, request: &JsonRpcRequest, _ctx: &RequestContext) -> JsonRpcResult<()> {
            self.events.lock().await.push(format!("before:{}", request.method));
            if request.method == self.deny {
                return Err(HandlerError::other("permission denied"));
            }
            Ok(())
        }

        async fn after_request(&self, ctx: &RequestContext, response: &mut JsonRpcMessage) {
            self.events.lock().await.push(format!("after:{}", ctx.method));
            // Attempt to break correlation; the dispatcher must undo it.
            if let JsonRpcMessage::Response(resp) = response {
                resp.id = RequestId::from("tampered");
            }
        }

        async fn before_notification(&self, n: &JsonRpcNotification) -> JsonRpcResult<()> {
            self.events.lock().await.push(format!("before-n:{}", n.method));
            Ok(())
        }

        async fn after_notification(&self, n: &JsonRpcNotification) {
            self.events.lock().await.push(format!("after-n:{}", n.method));
        }

        async fn on_error(&self, error: &HandlerError, target: DispatchTarget<'_>) -> Option<JsonRpcErrorObject> {
            self.events.lock().await.push(format!("error:{}", target.method()));
            if error.to_string().contains("replace me") {
                return JsonRpcErrorObject::server_error(-32099, "replaced", None);
            }
            None
        }
    }

    fn hooked_dispatcher(events: Arc<Mutex<Vec<String>>>) -> JsonRpcDispatcher {
        let mut dispatcher = ping_dispatcher();
        dispatcher.register_method(
            "replace",
            request_fn(|_req, _ctx| async { Err::<Value, _>(HandlerError::other("replace me")) }),
        );
        dispatcher.register_notification(
            "notifications/broken",
            notification_fn(|_n| async { Err::<(), _>(HandlerError::other("bad notification")) }),
        );
        dispatcher.set_hooks(RecordingHooks { events, deny: "secret" });
        dispatcher
    }

    #[tokio::test]
    async fn test_hooks_wrap_request_and_id_is_restored() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = hooked_dispatcher(Arc::clone(&events));

        let response = dispatcher
            .handle_request(JsonRpcRequest::new_no_params(RequestId::from(1), "ping"))
            .await;
        assert_eq!(response.id(), Some(&RequestId::from(1)));
        assert_eq!(*events.lock().await, vec!["before:ping", "after:ping"]);
    }

    #[tokio::test]
    async fn test_before_request_short_circuits() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = hooked_dispatcher(Arc::clone(&events));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        dispatcher.register_method(
            "secret",
            request_fn(move |_req, _ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, HandlerError>(Value::Null) }
            }),
        );

        let response = dispatcher
            .handle_request(JsonRpcRequest::new_no_params(RequestId::from(3), "secret"))
            .await;
        assert_eq!(response.error_code(), Some(error_codes::UNAUTHORIZED));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.gate().active(), 0);
    }

    #[tokio::test]
    async fn test_on_error_replacement_keeps_original_id() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = hooked_dispatcher(Arc::clone(&events));

        let response = dispatcher
            .handle_request(JsonRpcRequest::new_no_params(RequestId::from(4), "replace"))
            .await;
        match response {
            JsonRpcMessage::Error(err) => {
                assert_eq!(err.id, Some(RequestId::from(4)));
                assert_eq!(err.error.code, -32099);
                assert_eq!(err.error.message, "replaced");
            }
            other => panic!("expected error response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_notification_errors_go_to_on_error_only() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = hooked_dispatcher(Arc::clone(&events));

        dispatcher
            .handle_notification(JsonRpcNotification::new_no_params("notifications/broken"))
            .await;
        dispatcher
            .handle_notification(JsonRpcNotification::new_no_params("notifications/unknown"))
            .await;

        assert_eq!(
            *events.lock().await,
            vec![
                "before-n:notifications/broken",
                "error:notifications/broken",
                "after-n:notifications/broken",
            ]
        );
    }

    #[tokio::test]
    async fn test_notifications_bypass_gate() {
        let mut dispatcher = JsonRpcDispatcher::with_gate(ConcurrencyGate::new(1));
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        dispatcher.register_notification(
            "notifications/initialized",
            notification_fn(move |_n| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, HandlerError>(()) }
            }),
        );

        // Hold the only request slot; the notification must still run.
        let _held = dispatcher.gate().acquire().await;
        dispatcher
            .handle_notification(JsonRpcNotification::new_no_params("notifications/initialized"))
            .await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registered_methods() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = hooked_dispatcher(events);
        assert_eq!(
            dispatcher.registered_methods(),
            vec!["notifications/broken", "ping", "replace"]
        );
    }
}
