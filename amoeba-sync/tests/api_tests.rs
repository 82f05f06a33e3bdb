use amoeba_mapper::{FieldValue, RemotePayload};
use amoeba_sync::http::parse_body;
use amoeba_sync::{
    AmoebaApi, ApiError, Endpoints, HttpClient, ReqwestClient, RequestSettings, RetryPolicy,
    TransportResponse,
};
use amoeba_types::RemoteId;
use pretty_assertions::assert_eq;
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api_for(server: &MockServer) -> AmoebaApi {
    let http = ReqwestClient::new(Duration::from_secs(5), Some("tok".to_string())).unwrap();
    AmoebaApi::new(Arc::new(http), Endpoints::new(server.uri())).with_retry(RetryPolicy::none())
}

fn payload(email: &str) -> RemotePayload {
    let mut payload = RemotePayload::new();
    payload.insert("email".to_string(), FieldValue::text(email));
    payload
}

// ── Endpoints ────────────────────────────────────────────────────

#[test]
fn endpoints_append_json_format() {
    let e = Endpoints::new("https://crm.test/");
    assert_eq!(e.instance_url(), "https://crm.test");
    assert_eq!(e.fields(), "https://crm.test/api/contact/fields?_format=json");
    assert_eq!(e.create_contact(), "https://crm.test/api/contact/create?_format=json");
    assert_eq!(
        e.update_contact(&RemoteId::new("42")),
        "https://crm.test/contact/42?_format=json"
    );
    assert_eq!(e.retrieve_contacts(), "https://crm.test/api/retrieve/contact?_format=json");
    assert_eq!(e.authorize(), "https://crm.test/oauth2/authorize/");
    assert_eq!(e.access_token(), "https://crm.test/oauth2/token/");
}

#[test]
fn update_endpoint_escapes_remote_id() {
    let e = Endpoints::new("https://crm.test");
    assert_eq!(
        e.update_contact(&RemoteId::new("a/b c")),
        "https://crm.test/contact/a%2Fb%20c?_format=json"
    );
}

// ── Success and rejection ────────────────────────────────────────

#[tokio::test]
async fn create_contact_posts_json_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/contact/create"))
        .and(query_param("_format", "json"))
        .and(header("authorization", "Bearer tok"))
        .and(body_json(json!({ "email": { "value": "a@x.io" } })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "c-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let id = api_for(&server).create_contact(&payload("a@x.io")).await.unwrap();
    assert_eq!(id, RemoteId::new("c-1"));
}

#[tokio::test]
async fn accepted_status_with_numeric_id_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/contact/9"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "id": 9 })))
        .mount(&server)
        .await;

    let id = api_for(&server)
        .update_contact(&RemoteId::new("9"), &payload("a@x.io"))
        .await
        .unwrap();
    assert_eq!(id, RemoteId::new("9"));
}

#[tokio::test]
async fn other_success_codes_are_rejections() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let err = api_for(&server).create_contact(&payload("a@x.io")).await.unwrap_err();
    assert!(matches!(err, ApiError::Rejected { status: 204, .. }));
}

#[tokio::test]
async fn rejection_carries_remote_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "message": "Invalid email" })),
        )
        .mount(&server)
        .await;

    let err = api_for(&server).create_contact(&payload("nope")).await.unwrap_err();
    match &err {
        ApiError::Rejected { status, message } => {
            assert_eq!(*status, 400);
            assert_eq!(message, "Invalid email");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn form_encoded_error_body_is_understood() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_string("error=invalid_grant&error_description=Token+expired"),
        )
        .mount(&server)
        .await;

    let err = api_for(&server).retrieve_contacts(None).await.unwrap_err();
    match err {
        ApiError::Rejected { message, .. } => assert_eq!(message, "Token expired"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn plain_text_error_body_becomes_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal failure"))
        .mount(&server)
        .await;

    let err = api_for(&server).retrieve_contacts(None).await.unwrap_err();
    assert!(err.is_retryable());
    match err {
        ApiError::Rejected { message, .. } => assert_eq!(message, "Internal failure"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn update_without_id_is_missing_id() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(&server)
        .await;

    let err = api_for(&server)
        .update_contact(&RemoteId::new("1"), &payload("a@x.io"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::MissingId));
}

// ── Retries and timeouts ─────────────────────────────────────────

#[tokio::test]
async fn server_error_is_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "c-2" })))
        .with_priority(2)
        .mount(&server)
        .await;

    let http = ReqwestClient::new(Duration::from_secs(5), None).unwrap();
    let api = AmoebaApi::new(Arc::new(http), Endpoints::new(server.uri())).with_retry(
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
    );

    let id = api.create_contact(&payload("a@x.io")).await.unwrap();
    assert_eq!(id, RemoteId::new("c-2"));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[test]
fn rate_limit_is_retryable() {
    let err = ApiError::Rejected {
        status: 429,
        message: "slow down".into(),
    };
    assert!(err.is_retryable());
    assert_eq!(err.status(), Some(429));
    assert!(ApiError::Timeout.is_retryable());
    assert!(!ApiError::MissingId.is_retryable());
}

#[tokio::test]
async fn slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let http = ReqwestClient::new(Duration::from_millis(50), None).unwrap();
    let api = AmoebaApi::new(Arc::new(http), Endpoints::new(server.uri()))
        .with_retry(RetryPolicy::none());

    let err = api.retrieve_contacts(None).await.unwrap_err();
    assert!(matches!(err, ApiError::Timeout));
}

#[test]
fn backoff_doubles_and_caps() {
    let policy = RetryPolicy {
        max_retries: 5,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(350),
    };
    assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
    assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
    assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
    assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
}

// ── Retrieve ─────────────────────────────────────────────────────

#[tokio::test]
async fn retrieve_accepts_bare_array() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/retrieve/contact"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }, { "id": 2 }])))
        .mount(&server)
        .await;

    let contacts = api_for(&server).retrieve_contacts(None).await.unwrap();
    assert_eq!(contacts.len(), 2);
}

#[tokio::test]
async fn retrieve_sends_paging_as_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/retrieve/contact"))
        .and(query_param("_format", "json"))
        .and(query_param("page", "3"))
        .and(query_param("limit", "50"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "records": [{ "id": "x" }] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let contacts = api_for(&server).retrieve_contacts(Some((3, 50))).await.unwrap();
    assert_eq!(contacts, vec![json!({ "id": "x" })]);
}

#[tokio::test]
async fn retrieve_rejects_unrecognised_shape() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "total": 3 })))
        .mount(&server)
        .await;

    let err = api_for(&server).retrieve_contacts(None).await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
}

// ── Field discovery ──────────────────────────────────────────────

#[tokio::test]
async fn lead_fields_are_discovered_and_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/contact/fields"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "fields": { "email": "Email", "first_name": "First name" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server);
    let fields = api.available_lead_fields().await;
    assert_eq!(fields.len(), 2);
    let email = &fields["email"];
    assert_eq!(email.label, "Email");
    assert_eq!(email.field_type, "string");
    assert!(email.required);
    assert_eq!(email.group, "Contact");
    assert!(!fields["first_name"].required);

    // Second call is served from the cache.
    assert_eq!(api.available_lead_fields().await, fields);
}

#[tokio::test]
async fn failed_discovery_yields_empty_map_and_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let api = api_for(&server);
    assert!(api.available_lead_fields().await.is_empty());
    assert!(api.available_lead_fields().await.is_empty());
}

// ── Transport ────────────────────────────────────────────────────

#[tokio::test]
async fn parsed_mode_skips_status_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "x" })))
        .mount(&server)
        .await;

    let http = ReqwestClient::new(Duration::from_secs(5), None).unwrap();
    let settings = RequestSettings {
        return_raw: false,
        ..RequestSettings::default()
    };
    let response = http
        .send(Method::GET, &server.uri(), &json!(null), &settings)
        .await
        .unwrap();
    assert_eq!(response, TransportResponse::Parsed(json!({ "message": "x" })));
}

#[test]
fn parse_body_formats() {
    assert_eq!(parse_body(""), json!(null));
    assert_eq!(parse_body(" {\"id\": 1} "), json!({ "id": 1 }));
    assert_eq!(
        parse_body("a=1&b=two+words"),
        json!({ "a": "1", "b": "two words" })
    );
    assert_eq!(parse_body("Service Unavailable"), json!("Service Unavailable"));
    assert_eq!(parse_body("oops"), json!("oops"));
}
