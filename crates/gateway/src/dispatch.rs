//! The per-request message pipeline.
//!
//! Headers are checked before the body is decoded, then again against the
//! decoded message so failures can be correlated to its id. The handler is
//! looked up by message type within the target service and its outcome is
//! folded into exactly one response message or one status.

use std::{collections::HashMap, future::Future, panic::AssertUnwindSafe, pin::Pin, sync::Arc};

use {
    axum::{body::Bytes, http::HeaderMap},
    ctigate_common::entities::Account,
    ctigate_protocol::{
        Message, MessageType, StatusError,
        negotiation::{validate_request_headers, validate_request_headers_post_parse},
    },
    futures::FutureExt,
    tracing::{debug, error, warn},
};

use crate::{error::HandlerError, registry::Service, state::GatewayState};

pub const HANDLER_FAILURE: &str = "There was a failure while executing the message handler";
pub const NO_RESPONSE: &str = "The message handler did not produce a TAXII message";
pub const NOT_SUPPORTED: &str = "Message not supported by this service";

// ── Types ────────────────────────────────────────────────────────────────────

/// Everything a handler gets to see about the request it is answering.
pub struct RequestContext {
    pub state: Arc<GatewayState>,
    pub service: Arc<Service>,
    pub account: Option<Account>,
    pub message: Message,
    /// Raw request body, kept for inbox auditing.
    pub body: Bytes,
}

pub type HandlerResult = Result<Option<Message>, HandlerError>;

/// A boxed async message handler.
pub type MessageHandler = Box<
    dyn Fn(RequestContext) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync,
>;

/// Box an async fn as a [`MessageHandler`].
pub fn handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Box::new(move |ctx| Box::pin(f(ctx)))
}

/// The messages one service answers, keyed by message type.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<MessageType, MessageHandler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, message_type: MessageType, handler: MessageHandler) {
        self.handlers.insert(message_type, handler);
    }

    #[must_use]
    pub fn with(mut self, message_type: MessageType, handler: MessageHandler) -> Self {
        self.register(message_type, handler);
        self
    }

    pub fn get(&self, message_type: MessageType) -> Option<&MessageHandler> {
        self.handlers.get(&message_type)
    }

    pub fn message_types(&self) -> Vec<MessageType> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_by_key(|t| t.element_name());
        types
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

/// Run one POST through the pipeline.
///
/// Returns the handler's response message, or the status the request
/// terminated with. Every status produced after a successful parse carries
/// the request's message id.
pub async fn dispatch(
    state: &Arc<GatewayState>,
    service: &Arc<Service>,
    account: Option<Account>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Message, StatusError> {
    validate_request_headers(headers, &state.supported)?;

    let content_type = headers
        .get(ctigate_protocol::negotiation::X_TAXII_CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let message = state.codec.parse(content_type, &body)?;
    let message_id = message.message_id().to_string();
    let message_type = message.message_type();

    validate_request_headers_post_parse(headers, &message, &state.supported)?;

    let Some(handler) = service.handler(message_type) else {
        warn!(
            service_id = service.id(),
            message_id,
            message_type = message_type.element_name(),
            "message not supported"
        );
        return Err(StatusError::failure(NOT_SUPPORTED).in_response_to(message_id));
    };

    debug!(
        service_id = service.id(),
        message_id,
        message_type = message_type.element_name(),
        "dispatching message"
    );

    let ctx = RequestContext {
        state: Arc::clone(state),
        service: Arc::clone(service),
        account,
        message,
        body,
    };

    let outcome = AssertUnwindSafe(handler(ctx)).catch_unwind().await;
    match outcome {
        Ok(Ok(Some(response))) => {
            debug!(
                service_id = service.id(),
                message_id,
                response_type = response.message_type().element_name(),
                "message handled"
            );
            Ok(response)
        },
        Ok(Ok(None)) => {
            error!(service_id = service.id(), message_id, "handler produced no message");
            Err(StatusError::failure(NO_RESPONSE).in_response_to(message_id))
        },
        Ok(Err(HandlerError::Status(status))) => {
            debug!(
                service_id = service.id(),
                message_id,
                status = %status.status_type(),
                reason = %status.message,
                "handler returned status"
            );
            Err(status.or_in_response_to(&message_id))
        },
        Ok(Err(HandlerError::Internal(err))) => {
            error!(service_id = service.id(), message_id, error = %err, "handler failed");
            Err(StatusError::failure(HANDLER_FAILURE).in_response_to(message_id))
        },
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            error!(service_id = service.id(), message_id, panic = %detail, "handler panicked");
            Err(StatusError::failure(HANDLER_FAILURE).in_response_to(message_id))
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{registry::ServiceRegistry, state::GatewaySettings},
        axum::http::{HeaderValue, header},
        ctigate_auth::AccountStore,
        ctigate_common::entities::{DiscoveryProperties, ServiceDefinition, ServiceKind},
        ctigate_persistence::SqlitePersistence,
        ctigate_protocol::{
            MessageCodec, StatusType, XmlCodec,
            bindings::{VID_TAXII_HTTP_10, VID_TAXII_SERVICES_11, VID_TAXII_XML_11},
            messages::{CollectionInformationRequest, DiscoveryRequest},
            negotiation::{X_TAXII_CONTENT_TYPE, X_TAXII_PROTOCOL, X_TAXII_SERVICES},
        },
    };

    async fn state() -> Arc<GatewayState> {
        let persistence = SqlitePersistence::in_memory().await.unwrap();
        let accounts = AccountStore::new(persistence.pool().clone(), chrono::Duration::hours(1))
            .await
            .unwrap();
        GatewayState::new(
            Arc::new(persistence),
            accounts,
            ServiceRegistry::default(),
            GatewaySettings::default(),
        )
    }

    fn discovery_service(handlers: HandlerTable) -> Arc<Service> {
        let definition = ServiceDefinition {
            id: "discovery".into(),
            address: "/services/discovery".into(),
            description: None,
            protocol_bindings: vec![VID_TAXII_HTTP_10.into()],
            available: true,
            authentication_required: false,
            kind: ServiceKind::Discovery(DiscoveryProperties::default()),
        };
        Arc::new(Service::with_handlers(definition, "localhost:9000", handlers))
    }

    fn taxii_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/xml"));
        headers.insert(X_TAXII_CONTENT_TYPE, HeaderValue::from_static(VID_TAXII_XML_11));
        headers.insert(X_TAXII_SERVICES, HeaderValue::from_static(VID_TAXII_SERVICES_11));
        headers.insert(X_TAXII_PROTOCOL, HeaderValue::from_static(VID_TAXII_HTTP_10));
        headers
    }

    fn encode(message: Message) -> Bytes {
        Bytes::from(XmlCodec.serialize(&message).unwrap())
    }

    fn discovery_request(id: &str) -> Bytes {
        encode(
            DiscoveryRequest {
                message_id: id.into(),
            }
            .into(),
        )
    }

    async fn run(handlers: HandlerTable, body: Bytes) -> StatusError {
        let state = state().await;
        let service = discovery_service(handlers);
        match dispatch(&state, &service, None, &taxii_headers(), body).await {
            Ok(message) => panic!("expected a status, got {:?}", message.message_type()),
            Err(status) => status,
        }
    }

    fn only_discovery(h: MessageHandler) -> HandlerTable {
        HandlerTable::new().with(MessageType::DiscoveryRequest, h)
    }

    async fn failing(_ctx: RequestContext) -> HandlerResult {
        Err(HandlerError::internal("SECRET db password"))
    }

    async fn panicking(_ctx: RequestContext) -> HandlerResult {
        panic!("SECRET boom")
    }

    async fn silent(_ctx: RequestContext) -> HandlerResult {
        Ok(None)
    }

    async fn rejecting(_ctx: RequestContext) -> HandlerResult {
        Err(StatusError::not_found("feed", "The collection feed was not found").into())
    }

    #[tokio::test]
    async fn internal_errors_become_a_generic_failure() {
        let status = run(only_discovery(handler(failing)), discovery_request("m9")).await;
        assert_eq!(status.status_type(), StatusType::Failure);
        assert_eq!(status.message, HANDLER_FAILURE);
        assert!(!status.message.contains("SECRET"));
        assert_eq!(status.in_response_to.as_deref(), Some("m9"));
    }

    #[tokio::test]
    async fn handler_panics_become_a_generic_failure() {
        let status = run(only_discovery(handler(panicking)), discovery_request("m9")).await;
        assert_eq!(status.status_type(), StatusType::Failure);
        assert_eq!(status.message, HANDLER_FAILURE);
        assert!(!status.message.contains("SECRET"));
        assert_eq!(status.in_response_to.as_deref(), Some("m9"));
    }

    #[tokio::test]
    async fn handler_without_a_response_fails() {
        let status = run(only_discovery(handler(silent)), discovery_request("m9")).await;
        assert_eq!(status.status_type(), StatusType::Failure);
        assert_eq!(status.message, NO_RESPONSE);
        assert_eq!(status.in_response_to.as_deref(), Some("m9"));
    }

    #[tokio::test]
    async fn handler_statuses_pass_through_correlated() {
        let status = run(only_discovery(handler(rejecting)), discovery_request("m9")).await;
        assert_eq!(status.status_type(), StatusType::NotFound);
        assert_eq!(status.message, "The collection feed was not found");
        assert_eq!(status.in_response_to.as_deref(), Some("m9"));
    }

    #[tokio::test]
    async fn unknown_message_type_fails_correlated() {
        let body = encode(
            CollectionInformationRequest {
                message_id: "c-1".into(),
            }
            .into(),
        );
        let status = run(only_discovery(handler(silent)), body).await;
        assert_eq!(status.status_type(), StatusType::Failure);
        assert_eq!(status.message, NOT_SUPPORTED);
        assert_eq!(status.in_response_to.as_deref(), Some("c-1"));
    }

    #[tokio::test]
    async fn malformed_body_is_an_uncorrelated_bad_message() {
        let status = run(
            only_discovery(handler(silent)),
            Bytes::from_static(b"<not-taxii"),
        )
        .await;
        assert_eq!(status.status_type(), StatusType::BadMessage);
        assert!(status.in_response_to.is_none());
    }
}
