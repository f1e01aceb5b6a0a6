//! Payment provider webhook envelopes.
//!
//! The provider signs each delivery with `t=<unix>,v1=<hex>` where the hex
//! is HMAC-SHA256 over `"{t}.{body}"`. Deliveries are at-least-once and
//! unordered; reconciliation handles both.

use chrono::{DateTime, Utc};
use domain::{Money, PaymentEvent, PaymentOutcome};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

/// Maximum age of a signed delivery, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// A delivery that cannot be trusted or read.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("malformed signature header")]
    MalformedSignature,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("signature timestamp outside tolerance ({age_secs}s)")]
    StaleSignature { age_secs: i64 },

    #[error("invalid webhook payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("invalid event timestamp: {0}")]
    Timestamp(i64),
}

/// Verifies a signature header against the raw body in constant time.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::MalformedSignature)?;
    let signed_at: i64 = timestamp
        .parse()
        .map_err(|_| WebhookError::MalformedSignature)?;
    if signatures.is_empty() {
        return Err(WebhookError::MalformedSignature);
    }

    let mac = signing_mac(payload, timestamp, secret)?;
    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if !matched {
        return Err(WebhookError::SignatureMismatch);
    }

    let age_secs = now.timestamp() - signed_at;
    if age_secs.abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(WebhookError::StaleSignature { age_secs });
    }
    Ok(())
}

/// Builds the header a provider would send for `payload` at `timestamp`.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let timestamp = timestamp.to_string();
    let digest = signing_mac(payload, &timestamp, secret)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default();
    format!("t={timestamp},v1={digest}")
}

fn signing_mac(payload: &[u8], timestamp: &str, secret: &str) -> Result<Hmac<Sha256>, WebhookError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::MalformedSignature)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

#[derive(Debug, Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: ProviderObject,
}

#[derive(Debug, Deserialize)]
struct ProviderObject {
    id: String,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    amount_paid: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    booking_id: Option<String>,
}

/// Booking outcome carried by a provider event type, if any.
pub fn outcome_for(event_type: &str) -> Option<PaymentOutcome> {
    match event_type {
        "payment_intent.succeeded" | "invoice.paid" => Some(PaymentOutcome::Succeeded),
        "payment_intent.payment_failed"
        | "payment_intent.canceled"
        | "invoice.payment_failed"
        | "invoice.voided" => Some(PaymentOutcome::Failed),
        _ => None,
    }
}

/// Reads a provider envelope into a [`PaymentEvent`].
///
/// Event types without a booking outcome (subscription changes and the
/// like) parse with `outcome: None`.
pub fn parse_event(body: &[u8]) -> Result<PaymentEvent, WebhookError> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    let object = envelope.data.object;
    let is_invoice = envelope.event_type.starts_with("invoice.");

    let payment_ref = if is_invoice {
        object.payment_intent.unwrap_or(object.id)
    } else {
        object.id
    };
    let amount = if is_invoice {
        object.amount_paid.or(object.amount)
    } else {
        object.amount
    };
    let occurred_at = DateTime::from_timestamp(envelope.created, 0)
        .ok_or(WebhookError::Timestamp(envelope.created))?;

    Ok(PaymentEvent {
        outcome: outcome_for(&envelope.event_type),
        event_id: envelope.id,
        event_type: envelope.event_type,
        payment_ref,
        booking_ref: object.metadata.booking_id.filter(|id| !id.is_empty()),
        amount: amount.map(Money::from_cents),
        currency: object.currency.map(|c| c.to_lowercase()),
        occurred_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn signed_payload_verifies() {
        let body = br#"{"id":"evt_1"}"#;
        let header = signature_header(body, SECRET, now().timestamp());
        assert!(verify_signature(body, &header, SECRET, now()).is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let header = signature_header(br#"{"id":"evt_1"}"#, SECRET, now().timestamp());
        let err = verify_signature(br#"{"id":"evt_2"}"#, &header, SECRET, now()).unwrap_err();
        assert!(matches!(err, WebhookError::SignatureMismatch));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let body = br#"{"id":"evt_1"}"#;
        let header = signature_header(body, "whsec_other", now().timestamp());
        assert!(verify_signature(body, &header, SECRET, now()).is_err());
    }

    #[test]
    fn old_signature_is_rejected() {
        let body = br#"{"id":"evt_1"}"#;
        let header = signature_header(body, SECRET, now().timestamp() - 301);
        let err = verify_signature(body, &header, SECRET, now()).unwrap_err();
        assert!(matches!(err, WebhookError::StaleSignature { age_secs: 301 }));
    }

    #[test]
    fn header_without_signature_is_malformed() {
        let err = verify_signature(b"{}", "t=1746100800", SECRET, now()).unwrap_err();
        assert!(matches!(err, WebhookError::MalformedSignature));
    }

    #[test]
    fn payment_intent_success_parses() {
        let body = json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "created": 1_746_100_800,
            "data": {"object": {
                "id": "pi_0001",
                "amount": 25_000,
                "currency": "USD",
                "metadata": {"booking_id": "3f1c"}
            }}
        });
        let event = parse_event(body.to_string().as_bytes()).unwrap();

        assert_eq!(event.event_id, "evt_1");
        assert_eq!(event.payment_ref, "pi_0001");
        assert_eq!(event.booking_ref.as_deref(), Some("3f1c"));
        assert_eq!(event.outcome, Some(PaymentOutcome::Succeeded));
        assert_eq!(event.amount, Some(Money::from_cents(25_000)));
        assert_eq!(event.currency.as_deref(), Some("usd"));
        assert_eq!(event.occurred_at.timestamp(), 1_746_100_800);
    }

    #[test]
    fn invoice_uses_its_payment_intent() {
        let body = json!({
            "id": "evt_2",
            "type": "invoice.payment_failed",
            "created": 1_746_100_800,
            "data": {"object": {"id": "in_1", "amount_paid": 0, "payment_intent": "pi_7"}}
        });
        let event = parse_event(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.payment_ref, "pi_7");
        assert_eq!(event.outcome, Some(PaymentOutcome::Failed));
        assert_eq!(event.booking_ref, None);

        let voided = json!({
            "id": "evt_3",
            "type": "invoice.voided",
            "created": 1_746_100_800,
            "data": {"object": {"id": "in_2"}}
        });
        assert_eq!(parse_event(voided.to_string().as_bytes()).unwrap().payment_ref, "in_2");
    }

    #[test]
    fn subscription_events_carry_no_outcome() {
        let body = json!({
            "id": "evt_4",
            "type": "customer.subscription.updated",
            "created": 1_746_100_800,
            "data": {"object": {"id": "sub_1"}}
        });
        assert_eq!(parse_event(body.to_string().as_bytes()).unwrap().outcome, None);
    }

    #[test]
    fn garbage_is_a_payload_error() {
        assert!(matches!(parse_event(b"not json"), Err(WebhookError::Payload(_))));
    }
}
