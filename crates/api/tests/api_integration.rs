//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::BusinessId;
use domain::{InventoryItem, Money};
use engine::webhook::signature_header;
use engine::{
    BookingEngine, ChannelBroadcaster, Clock, EngineSettings, FixedClock, InMemoryPaymentGateway,
    Services,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use store::{BookingStore, InMemoryBookingStore};
use tower::ServiceExt;

const SECRET: &str = "whsec_test";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
}

struct TestApp {
    app: axum::Router,
    clock: FixedClock,
    gateway: InMemoryPaymentGateway,
    business_id: BusinessId,
    castle: InventoryItem,
}

impl TestApp {
    async fn new(castles: u32) -> Self {
        let store = InMemoryBookingStore::new();
        let business_id = BusinessId::new();
        let castle = InventoryItem::new(
            business_id,
            "Castle Bounce House",
            castles,
            Money::from_dollars(250),
        );
        store.put_inventory_item(castle.clone()).await.unwrap();

        let clock = FixedClock::new(start());
        let gateway = InMemoryPaymentGateway::new();
        let updates = ChannelBroadcaster::default();
        let services = Services {
            payments: Arc::new(gateway.clone()),
            ..Services::in_memory(updates.clone())
        };
        let engine = BookingEngine::new(
            store,
            services,
            EngineSettings::default(),
            Arc::new(clock.clone()),
        );
        let state = Arc::new(api::AppState::new(
            Arc::new(engine),
            updates,
            Some(SECRET.to_string()),
        ));

        Self {
            app: api::create_app(state, get_metrics_handle()),
            clock,
            gateway,
            business_id,
            castle,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn hold(&self) -> (StatusCode, Value) {
        self.post(
            &format!("/businesses/{}/holds", self.business_id),
            json!({
                "date": "2025-06-01",
                "start": "09:00",
                "end": "17:00",
                "timezone": "America/Chicago",
                "items": [{ "inventory_item_id": self.castle.id, "quantity": 1 }]
            }),
        )
        .await
    }

    async fn checkout(&self, hold_id: &str, total_cents: i64) -> (StatusCode, Value) {
        self.post(
            &format!("/holds/{hold_id}/booking"),
            json!({
                "customer": { "name": "Ana Lopez", "email": "ana@example.com" },
                "pricing": { "subtotal": 25000, "tax": 0, "total": total_cents }
            }),
        )
        .await
    }

    async fn webhook(&self, payload: &Value, signature: Option<String>) -> (StatusCode, Value) {
        let body = payload.to_string();
        let mut request = Request::builder()
            .method("POST")
            .uri("/webhooks/payments")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            request = request.header("stripe-signature", signature);
        }
        self.send(request.body(Body::from(body)).unwrap()).await
    }

    fn sign(&self, payload: &Value) -> String {
        signature_header(
            payload.to_string().as_bytes(),
            SECRET,
            self.clock.now().timestamp(),
        )
    }
}

fn succeeded(event_id: &str, booking_id: &str, payment_ref: &str) -> Value {
    json!({
        "id": event_id,
        "type": "payment_intent.succeeded",
        "created": start().timestamp(),
        "data": { "object": {
            "id": payment_ref,
            "amount": 25000,
            "currency": "usd",
            "metadata": { "booking_id": booking_id }
        }}
    })
}

#[tokio::test]
async fn test_health_check() {
    let t = TestApp::new(1).await;
    let (status, json) = t.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["webhook_verification"], true);
}

#[tokio::test]
async fn test_availability_search() {
    let t = TestApp::new(2).await;
    let (status, json) = t
        .get(&format!(
            "/businesses/{}/availability?date=2025-06-01&start=09:00&end=17:00&timezone=America/Chicago",
            t.business_id
        ))
        .await;

    assert_eq!(status, StatusCode::OK);
    let items = json["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["name"], "Castle Bounce House");
    assert_eq!(items[0]["remaining_quantity"], 2);
    assert_eq!(json["window"]["start"], "2025-06-01T14:00:00Z");
}

#[tokio::test]
async fn test_availability_rejects_unknown_timezone() {
    let t = TestApp::new(1).await;
    let (status, json) = t
        .get(&format!(
            "/businesses/{}/availability?date=2025-06-01&start=09:00&end=17:00&timezone=Mars/Olympus",
            t.business_id
        ))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("timezone"));
}

#[tokio::test]
async fn test_booking_flow_confirms_on_signed_webhook() {
    let t = TestApp::new(1).await;

    let (status, hold) = t.hold().await;
    assert_eq!(status, StatusCode::CREATED);
    let hold_id = hold["hold_id"].as_str().unwrap().to_string();

    let (status, checkout) = t.checkout(&hold_id, 25000).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(checkout["status"], "PENDING");
    assert_eq!(checkout["amount_due"], 25000);
    let booking_id = checkout["booking_id"].as_str().unwrap().to_string();
    let payment_ref = checkout["payment"]["provider_payment_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(checkout["payment"]["client_secret"].is_string());

    // A retried checkout resumes the same booking and payment.
    let (status, retry) = t.checkout(&hold_id, 25000).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(retry["booking_id"], checkout["booking_id"]);
    assert_eq!(retry["payment"], checkout["payment"]);
    assert_eq!(t.gateway.intent_count(), 1);

    let event = succeeded("evt_1", &booking_id, &payment_ref);
    let (status, ack) = t.webhook(&event, Some(t.sign(&event))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["receipt"], "applied");

    let (status, ack) = t.webhook(&event, Some(t.sign(&event))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["receipt"], "duplicate");

    let (status, booking) = t.get(&format!("/bookings/{booking_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(booking["status"], "CONFIRMED");

    let (_, events) = t.get(&format!("/bookings/{booking_id}/events")).await;
    let types: Vec<&str> = events
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event_type"].as_str().unwrap())
        .collect();
    assert_eq!(
        types,
        vec!["BookingCreated", "PaymentInitiated", "BookingConfirmed"]
    );

    let (_, payments) = t.get(&format!("/bookings/{booking_id}/payments")).await;
    assert_eq!(payments[0]["status"], "COMPLETED");
}

#[tokio::test]
async fn test_sold_out_hold_returns_conflict_with_shortfalls() {
    let t = TestApp::new(1).await;
    let (status, _) = t.hold().await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, json) = t.hold().await;
    assert_eq!(status, StatusCode::CONFLICT);
    let shortfalls = json["details"]["shortfalls"].as_array().unwrap();
    assert_eq!(shortfalls[0]["requested"], 1);
    assert_eq!(shortfalls[0]["remaining"], 0);
}

#[tokio::test]
async fn test_price_mismatch_is_unprocessable() {
    let t = TestApp::new(1).await;
    let (_, hold) = t.hold().await;

    let (status, json) = t
        .checkout(hold["hold_id"].as_str().unwrap(), 20000)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["details"]["field"], "total");
    assert_eq!(json["details"]["expected"], 25000);
}

#[tokio::test]
async fn test_lapsed_hold_is_gone() {
    let t = TestApp::new(1).await;
    let (_, hold) = t.hold().await;

    t.clock.advance(Duration::minutes(16));
    let (status, json) = t
        .checkout(hold["hold_id"].as_str().unwrap(), 25000)
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(json["error"], "your reservation expired, please search again");
}

#[tokio::test]
async fn test_released_hold_frees_capacity() {
    let t = TestApp::new(1).await;
    let (_, hold) = t.hold().await;
    let hold_id = hold["hold_id"].as_str().unwrap();

    let (status, _) = t
        .send(
            Request::builder()
                .method("DELETE")
                .uri(format!("/holds/{hold_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = t.checkout(hold_id, 25000).await;
    assert_eq!(status, StatusCode::GONE);
    let (status, _) = t.hold().await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_webhook_signature_is_enforced() {
    let t = TestApp::new(1).await;
    let event = succeeded("evt_1", "00000000-0000-0000-0000-000000000000", "pi_0001");

    let (status, _) = t.webhook(&event, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .webhook(&event, Some("t=1,v1=deadbeef".to_string()))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_for_unknown_booking_is_acknowledged() {
    let t = TestApp::new(1).await;
    let event = succeeded(
        "evt_9",
        "00000000-0000-0000-0000-000000000000",
        "pi_9999",
    );

    let (status, ack) = t.webhook(&event, Some(t.sign(&event))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["receipt"], "failed");
}

#[tokio::test]
async fn test_cancel_booking() {
    let t = TestApp::new(1).await;
    let (_, hold) = t.hold().await;
    let (_, checkout) = t
        .checkout(hold["hold_id"].as_str().unwrap(), 25000)
        .await;
    let booking_id = checkout["booking_id"].as_str().unwrap();

    let (status, booking) = t
        .post(
            &format!("/bookings/{booking_id}/cancel"),
            json!({ "reason": "customer called" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(booking["status"], "CANCELLED");

    let (status, _) = t.hold().await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_booking_lookup_errors() {
    let t = TestApp::new(1).await;

    let (status, _) = t.get("/bookings/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .get("/bookings/00000000-0000-0000-0000-000000000000")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_booking_stream_is_event_stream() {
    let t = TestApp::new(1).await;
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/businesses/{}/bookings/stream", t.business_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = TestApp::new(1).await;
    t.hold().await;

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("holds_created_total"));
}
