//! End-to-end tests: a real server on an ephemeral port driven over HTTP.

use std::{net::SocketAddr, sync::Arc};

use {
    chrono::{Duration, Utc},
    ctigate_auth::AccountStore,
    ctigate_common::{
        ContentBinding,
        entities::{
            CollectionDefinition, CollectionManagementProperties, CollectionType,
            DiscoveryProperties, InboxProperties, PollProperties, PollRequestParameters,
            ResponseType, ServiceDefinition, ServiceKind, SubscriptionStatus,
        },
    },
    ctigate_config::{AccountConfig, CtigateConfig},
    ctigate_gateway::{GatewayState, build_gateway_app, sync_config},
    ctigate_persistence::SqlitePersistence,
    ctigate_protocol::{
        Message, MessageCodec, StatusType, XmlCodec,
        bindings::{VID_TAXII_HTTP_10, VID_TAXII_SERVICES_11, VID_TAXII_XML_11},
        messages::{
            CollectionInformationRequest, ContentBlockPayload, DiscoveryRequest, InboxMessage,
            ManageCollectionSubscriptionRequest, PollFulfillmentRequest, PollParameters,
            PollRequest, StatusMessage, SubscriptionAction,
        },
    },
    secrecy::Secret,
    sqlx::sqlite::SqlitePoolOptions,
    tokio::net::TcpListener,
};

const STIX: &str = "urn:stix.mitre.org:xml:1.1.1";

// ── Fixture ──────────────────────────────────────────────────────────────────

fn service(id: &str, kind: ServiceKind) -> ServiceDefinition {
    ServiceDefinition {
        id: id.into(),
        address: format!("/services/{id}"),
        description: Some(format!("{id} service")),
        protocol_bindings: vec![VID_TAXII_HTTP_10.into()],
        available: true,
        authentication_required: false,
        kind,
    }
}

fn test_config() -> CtigateConfig {
    let mut protected = service(
        "protected",
        ServiceKind::Discovery(DiscoveryProperties::default()),
    );
    protected.authentication_required = true;
    let mut down = service("down", ServiceKind::Discovery(DiscoveryProperties::default()));
    down.available = false;

    CtigateConfig {
        services: vec![
            service(
                "discovery",
                ServiceKind::Discovery(DiscoveryProperties {
                    advertised_services: vec![
                        "discovery".into(),
                        "inbox".into(),
                        "poll".into(),
                        "collections".into(),
                    ],
                }),
            ),
            service(
                "inbox",
                ServiceKind::Inbox(InboxProperties {
                    accept_all_content: false,
                    supported_content: vec![ContentBinding::new(STIX)],
                    destination_collection_required: false,
                }),
            ),
            service(
                "poll",
                ServiceKind::Poll(PollProperties {
                    max_result_size: 2,
                    max_result_count: 100,
                    subscription_required: false,
                }),
            ),
            service(
                "collections",
                ServiceKind::CollectionManagement(CollectionManagementProperties {
                    subscription_supported: true,
                }),
            ),
            protected,
            down,
        ],
        collections: vec![CollectionDefinition {
            name: "feed".into(),
            description: Some("indicator feed".into()),
            collection_type: CollectionType::Feed,
            available: true,
            accept_all_content: false,
            supported_content: vec![ContentBinding::new(STIX)],
            service_ids: vec!["inbox".into(), "poll".into(), "collections".into()],
        }],
        accounts: vec![AccountConfig {
            username: "analyst".into(),
            password: Secret::new("correct horse".into()),
        }],
        ..Default::default()
    }
}

async fn start_server() -> SocketAddr {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    ctigate_persistence::run_migrations(&pool).await.unwrap();
    let persistence = Arc::new(SqlitePersistence::with_pool(pool.clone()));
    let accounts = AccountStore::new(pool, Duration::hours(1)).await.unwrap();

    let config = test_config();
    sync_config(persistence.as_ref(), &accounts, &config)
        .await
        .unwrap();
    let state = GatewayState::load(&config, persistence, accounts)
        .await
        .unwrap();
    let app = build_gateway_app(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn taxii_request(addr: SocketAddr, path: &str, body: Vec<u8>) -> reqwest::RequestBuilder {
    reqwest::Client::new()
        .post(format!("http://{addr}{path}"))
        .header("Content-Type", "application/xml")
        .header("Accept", "application/xml")
        .header("X-TAXII-Content-Type", VID_TAXII_XML_11)
        .header("X-TAXII-Services", VID_TAXII_SERVICES_11)
        .header("X-TAXII-Protocol", VID_TAXII_HTTP_10)
        .body(body)
}

async fn send(addr: SocketAddr, path: &str, message: Message) -> Message {
    send_with(taxii_request(addr, path, XmlCodec.serialize(&message).unwrap())).await
}

async fn send_with(request: reqwest::RequestBuilder) -> Message {
    let response = request.send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["x-taxii-content-type"],
        VID_TAXII_XML_11
    );
    let body = response.bytes().await.unwrap();
    XmlCodec.parse(VID_TAXII_XML_11, &body).unwrap()
}

fn expect_status(message: Message) -> StatusMessage {
    match message {
        Message::StatusMessage(status) => status,
        other => panic!("expected a status message, got {:?}", other.message_type()),
    }
}

fn inbox_message(id: &str, binding: &str, count: usize) -> Message {
    let base = Utc::now() - Duration::hours(1);
    InboxMessage {
        message_id: id.into(),
        result_id: None,
        destination_collection_names: vec!["feed".into()],
        message: None,
        source_subscription: None,
        record_count: None,
        content_blocks: (0..count)
            .map(|i| ContentBlockPayload {
                content_binding: ContentBinding::new(binding),
                content: format!("indicator-{i}"),
                timestamp_label: Some(base + Duration::seconds(i64::try_from(i).unwrap())),
                message: None,
            })
            .collect(),
    }
    .into()
}

fn poll_request(id: &str) -> Message {
    PollRequest {
        message_id: id.into(),
        collection_name: "feed".into(),
        exclusive_begin_timestamp_label: None,
        inclusive_end_timestamp_label: None,
        subscription_id: None,
        poll_parameters: Some(PollParameters::default()),
    }
    .into()
}

// ── Discovery and transport ──────────────────────────────────────────────────

#[tokio::test]
async fn discovery_lists_advertised_services() {
    let addr = start_server().await;
    let response = send(
        addr,
        "/services/discovery",
        DiscoveryRequest {
            message_id: "d-1".into(),
        }
        .into(),
    )
    .await;

    let Message::DiscoveryResponse(discovery) = response else {
        panic!("expected a discovery response");
    };
    assert_eq!(discovery.in_response_to, "d-1");
    assert_eq!(discovery.service_instances.len(), 4);
    let inbox = discovery
        .service_instances
        .iter()
        .find(|s| s.address.ends_with("/services/inbox"))
        .unwrap();
    assert_eq!(inbox.address, "http://127.0.0.1:9000/services/inbox");
    assert_eq!(inbox.inbox_service_accepted_content.len(), 1);
}

#[tokio::test]
async fn options_advertises_methods_and_bindings() {
    let addr = start_server().await;
    let response = reqwest::Client::new()
        .request(
            reqwest::Method::OPTIONS,
            format!("http://{addr}/services/inbox"),
        )
        .header("X-TAXII-Content-Type", VID_TAXII_XML_11)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["allow"], "POST, OPTIONS");
    assert_eq!(response.headers()["x-taxii-content-types"], VID_TAXII_XML_11);
}

#[tokio::test]
async fn get_on_service_is_not_allowed() {
    let addr = start_server().await;
    let response = reqwest::Client::new()
        .get(format!("http://{addr}/services/inbox"))
        .header("X-TAXII-Content-Type", VID_TAXII_XML_11)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);
    assert_eq!(response.headers()["allow"], "POST, OPTIONS");
}

#[tokio::test]
async fn non_taxii_requests_are_turned_away() {
    let addr = start_server().await;
    let client = reqwest::Client::new();

    let unknown = taxii_request(addr, "/services/nowhere", Vec::new())
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), 404);

    let plain = client
        .post(format!("http://{addr}/services/inbox"))
        .send()
        .await
        .unwrap();
    assert_eq!(plain.status(), 404);

    let json = client
        .post(format!("http://{addr}/services/inbox"))
        .header("Accept", "application/json")
        .send()
        .await
        .unwrap();
    assert_eq!(json.status(), 415);

    let html = client
        .post(format!("http://{addr}/services/inbox"))
        .header("Accept", "text/html")
        .header("X-TAXII-Content-Type", VID_TAXII_XML_11)
        .send()
        .await
        .unwrap();
    assert_eq!(html.status(), 406);
}

// ── Pipeline failures ────────────────────────────────────────────────────────

#[tokio::test]
async fn malformed_body_is_an_uncorrelated_bad_message() {
    let addr = start_server().await;
    let status = expect_status(
        send_with(taxii_request(
            addr,
            "/services/discovery",
            b"<not-closed".to_vec(),
        ))
        .await,
    );
    assert_eq!(status.status_type, StatusType::BadMessage);
    assert_eq!(status.in_response_to, "0");
}

#[tokio::test]
async fn missing_services_header_is_a_bad_message() {
    let addr = start_server().await;
    let body = XmlCodec
        .serialize(
            &DiscoveryRequest {
                message_id: "d-2".into(),
            }
            .into(),
        )
        .unwrap();
    let request = reqwest::Client::new()
        .post(format!("http://{addr}/services/discovery"))
        .header("Content-Type", "application/xml")
        .header("X-TAXII-Content-Type", VID_TAXII_XML_11)
        .body(body);
    let status = expect_status(send_with(request).await);
    assert_eq!(status.status_type, StatusType::BadMessage);
}

#[tokio::test]
async fn unsupported_message_type_fails_correlated() {
    let addr = start_server().await;
    let status = expect_status(send(addr, "/services/discovery", poll_request("p-0")).await);
    assert_eq!(status.status_type, StatusType::Failure);
    assert_eq!(status.in_response_to, "p-0");
}

#[tokio::test]
async fn protected_service_requires_a_token() {
    let addr = start_server().await;
    let request: Message = DiscoveryRequest {
        message_id: "d-3".into(),
    }
    .into();

    let status = expect_status(send(addr, "/services/protected", request.clone()).await);
    assert_eq!(status.status_type, StatusType::Unauthorized);

    let client = reqwest::Client::new();
    let token: serde_json::Value = client
        .post(format!("http://{addr}/api/auth"))
        .json(&serde_json::json!({ "username": "analyst", "password": "correct horse" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let token = token["token"].as_str().unwrap();

    let body = XmlCodec.serialize(&request).unwrap();
    let response = send_with(
        taxii_request(addr, "/services/protected", body).bearer_auth(token),
    )
    .await;
    assert!(matches!(response, Message::DiscoveryResponse(_)));

    let body = XmlCodec.serialize(&request).unwrap();
    let rejected = expect_status(
        send_with(taxii_request(addr, "/services/discovery", body).bearer_auth("forged")).await,
    );
    assert_eq!(rejected.status_type, StatusType::Unauthorized);
}

#[tokio::test]
async fn unavailable_service_fails() {
    let addr = start_server().await;
    let status = expect_status(
        send(
            addr,
            "/services/down",
            DiscoveryRequest {
                message_id: "d-4".into(),
            }
            .into(),
        )
        .await,
    );
    assert_eq!(status.status_type, StatusType::Failure);
}

// ── Content flow ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn inbox_then_poll_in_parts() {
    let addr = start_server().await;

    let ack = expect_status(send(addr, "/services/inbox", inbox_message("in-1", STIX, 5)).await);
    assert_eq!(ack.status_type, StatusType::Success);
    assert_eq!(ack.in_response_to, "in-1");

    let Message::PollResponse(first) = send(addr, "/services/poll", poll_request("p-1")).await
    else {
        panic!("expected a poll response");
    };
    assert_eq!(first.in_response_to, "p-1");
    assert_eq!(first.content_blocks.len(), 2);
    assert_eq!(first.content_blocks[0].content, "indicator-0");
    assert!(first.more);
    assert_eq!(first.result_part_number, 1);
    assert_eq!(first.record_count.unwrap().record_count, 5);
    let result_id = first.result_id.unwrap();

    let fulfillment = |part: u32| -> Message {
        PollFulfillmentRequest {
            message_id: format!("f-{part}"),
            collection_name: "feed".into(),
            result_id: result_id.clone(),
            result_part_number: part,
        }
        .into()
    };

    let Message::PollResponse(last) = send(addr, "/services/poll", fulfillment(3)).await else {
        panic!("expected a poll response");
    };
    assert_eq!(last.content_blocks.len(), 1);
    assert_eq!(last.content_blocks[0].content, "indicator-4");
    assert!(!last.more);

    let status = expect_status(send(addr, "/services/poll", fulfillment(4)).await);
    assert_eq!(status.status_type, StatusType::InvalidResponsePart);
    assert_eq!(status.in_response_to, "f-4");
}

#[tokio::test]
async fn count_only_poll_returns_no_blocks() {
    let addr = start_server().await;
    send(addr, "/services/inbox", inbox_message("in-2", STIX, 3)).await;

    let request: Message = PollRequest {
        message_id: "p-2".into(),
        collection_name: "feed".into(),
        exclusive_begin_timestamp_label: None,
        inclusive_end_timestamp_label: None,
        subscription_id: None,
        poll_parameters: Some(PollParameters {
            response_type: ResponseType::CountOnly,
            ..Default::default()
        }),
    }
    .into();
    let Message::PollResponse(response) = send(addr, "/services/poll", request).await else {
        panic!("expected a poll response");
    };
    assert!(response.content_blocks.is_empty());
    assert_eq!(response.record_count.unwrap().record_count, 3);
}

#[tokio::test]
async fn inbox_rejects_unsupported_content() {
    let addr = start_server().await;
    let status =
        expect_status(send(addr, "/services/inbox", inbox_message("in-3", "urn:other", 1)).await);
    assert_eq!(status.status_type, StatusType::UnsupportedContent);
    assert_eq!(status.in_response_to, "in-3");
}

#[tokio::test]
async fn poll_of_unknown_collection_is_not_found() {
    let addr = start_server().await;
    let request: Message = PollRequest {
        message_id: "p-3".into(),
        collection_name: "missing".into(),
        exclusive_begin_timestamp_label: None,
        inclusive_end_timestamp_label: None,
        subscription_id: None,
        poll_parameters: None,
    }
    .into();
    let status = expect_status(send(addr, "/services/poll", request).await);
    assert_eq!(status.status_type, StatusType::NotFound);
}

// ── Collection management ────────────────────────────────────────────────────

#[tokio::test]
async fn collection_information_reports_volume_and_services() {
    let addr = start_server().await;
    send(addr, "/services/inbox", inbox_message("in-4", STIX, 2)).await;

    let response = send(
        addr,
        "/services/collections",
        CollectionInformationRequest {
            message_id: "c-1".into(),
        }
        .into(),
    )
    .await;
    let Message::CollectionInformationResponse(info) = response else {
        panic!("expected a collection information response");
    };
    assert_eq!(info.collections.len(), 1);
    let feed = &info.collections[0];
    assert_eq!(feed.collection_name, "feed");
    assert_eq!(feed.collection_volume, Some(2));
    assert_eq!(feed.polling_services.len(), 1);
    assert_eq!(feed.subscription_services.len(), 1);
    assert_eq!(feed.receiving_inbox_services.len(), 1);
}

#[tokio::test]
async fn subscription_lifecycle() {
    let addr = start_server().await;
    let request = |id: &str, action, subscription_id: Option<String>| -> Message {
        ManageCollectionSubscriptionRequest {
            message_id: id.into(),
            collection_name: "feed".into(),
            action,
            subscription_id,
            subscription_parameters: Some(PollRequestParameters::default()),
        }
        .into()
    };

    let Message::ManageCollectionSubscriptionResponse(created) = send(
        addr,
        "/services/collections",
        request("s-1", SubscriptionAction::Subscribe, None),
    )
    .await
    else {
        panic!("expected a subscription response");
    };
    let instance = &created.subscription_instances[0];
    assert_eq!(instance.status, SubscriptionStatus::Active);
    assert_eq!(instance.poll_instances.len(), 1);
    let id = instance.subscription_id.clone();

    let Message::ManageCollectionSubscriptionResponse(paused) = send(
        addr,
        "/services/collections",
        request("s-2", SubscriptionAction::Pause, Some(id.clone())),
    )
    .await
    else {
        panic!("expected a subscription response");
    };
    assert_eq!(paused.subscription_instances[0].status, SubscriptionStatus::Paused);

    let paused_poll: Message = PollRequest {
        message_id: "p-4".into(),
        collection_name: "feed".into(),
        exclusive_begin_timestamp_label: None,
        inclusive_end_timestamp_label: None,
        subscription_id: Some(id.clone()),
        poll_parameters: None,
    }
    .into();
    let status = expect_status(send(addr, "/services/poll", paused_poll).await);
    assert_eq!(status.status_type, StatusType::Failure);

    let unknown = expect_status(
        send(
            addr,
            "/services/collections",
            request("s-3", SubscriptionAction::Resume, Some("nope".into())),
        )
        .await,
    );
    assert_eq!(unknown.status_type, StatusType::NotFound);
    assert_eq!(unknown.in_response_to, "s-3");
}

// ── Admin endpoints ──────────────────────────────────────────────────────────

#[tokio::test]
async fn health_and_token_endpoints() {
    let addr = start_server().await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("http://{addr}/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["alive"], true);

    let wrong = client
        .post(format!("http://{addr}/api/auth"))
        .json(&serde_json::json!({ "username": "analyst", "password": "nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let incomplete = client
        .post(format!("http://{addr}/api/auth"))
        .json(&serde_json::json!({ "username": "analyst" }))
        .send()
        .await
        .unwrap();
    assert_eq!(incomplete.status(), 400);
}
