//! Signed webhook payloads from the payment processor.
//!
//! Header format: `Stripe-Signature: t=<unix seconds>,v1=<hex hmac>[,v1=...]`
//! where each `v1` is HMAC-SHA256 over `"{t}.{raw body}"` keyed with the
//! endpoint secret.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,
    #[error("malformed signature header")]
    Malformed,
    #[error("timestamp outside tolerance window")]
    TimestampOutOfTolerance,
    #[error("no signature matches the payload")]
    Mismatch,
}

fn mac_for(secret: &str, timestamp: &str, payload: &[u8]) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

/// Verifies a signature header against the raw request body.
///
/// `now` is unix seconds; the signed timestamp must be within `tolerance_secs`
/// of it in either direction.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    let signed_at: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;

    if now.abs_diff(signed_at) > tolerance_secs {
        return Err(SignatureError::TimestampOutOfTolerance);
    }

    let mac = mac_for(secret, timestamp, payload);
    let matched = signatures.iter().any(|candidate| match hex::decode(candidate) {
        Ok(bytes) => mac.clone().verify_slice(&bytes).is_ok(),
        Err(_) => false,
    });

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Produces a header value that `verify_signature` accepts
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let ts = timestamp.to_string();
    let signature = hex::encode(mac_for(secret, &ts, payload).finalize().into_bytes());
    format!("t={},v1={}", ts, signature)
}

/// The subset of a processor event that settlement needs
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: EventObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventObject {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub last_payment_error: Option<LastPaymentError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LastPaymentError {
    pub code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PaymentSucceeded,
    PaymentFailed,
    PaymentCanceled,
    Other,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn kind(&self) -> EventKind {
        match self.event_type.as_str() {
            "payment_intent.succeeded" => EventKind::PaymentSucceeded,
            "payment_intent.payment_failed" => EventKind::PaymentFailed,
            "payment_intent.canceled" => EventKind::PaymentCanceled,
            _ => EventKind::Other,
        }
    }

    /// Payment intent the event refers to
    pub fn payment_intent_id(&self) -> &str {
        &self.data.object.id
    }

    pub fn failure_message(&self) -> Option<&str> {
        self.data
            .object
            .last_payment_error
            .as_ref()
            .and_then(|e| e.message.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";
    const NOW: i64 = 1_700_000_000;

    fn payload() -> &'static [u8] {
        br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#
    }

    #[test]
    fn valid_signature_is_accepted() {
        let header = sign_payload(payload(), SECRET, NOW);
        assert_eq!(verify_signature(payload(), &header, SECRET, 300, NOW), Ok(()));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let header = sign_payload(payload(), "whsec_other", NOW);
        assert_eq!(
            verify_signature(payload(), &header, SECRET, 300, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn modified_payload_is_rejected() {
        let header = sign_payload(payload(), SECRET, NOW);
        let tampered = br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_2"}}}"#;
        assert_eq!(
            verify_signature(tampered, &header, SECRET, 300, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn old_timestamp_is_rejected() {
        let header = sign_payload(payload(), SECRET, NOW - 600);
        assert_eq!(
            verify_signature(payload(), &header, SECRET, 300, NOW),
            Err(SignatureError::TimestampOutOfTolerance)
        );
    }

    #[test]
    fn missing_parts_are_malformed() {
        assert_eq!(
            verify_signature(payload(), "v1=abcd", SECRET, 300, NOW),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_signature(payload(), &format!("t={}", NOW), SECRET, 300, NOW),
            Err(SignatureError::Malformed)
        );
    }

    #[test]
    fn any_matching_v1_is_accepted() {
        let good = sign_payload(payload(), SECRET, NOW);
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1={},v1={}", NOW, "00".repeat(32), good_sig);
        assert_eq!(verify_signature(payload(), &header, SECRET, 300, NOW), Ok(()));
    }

    #[test]
    fn parses_event_kind_and_intent() {
        let event = WebhookEvent::parse(
            br#"{"id":"evt_2","type":"payment_intent.payment_failed","data":{"object":{"id":"pi_9","last_payment_error":{"code":"card_declined","message":"Declined"}}}}"#,
        )
        .unwrap();
        assert_eq!(event.kind(), EventKind::PaymentFailed);
        assert_eq!(event.payment_intent_id(), "pi_9");
        assert_eq!(event.failure_message(), Some("Declined"));

        let other = WebhookEvent::parse(br#"{"type":"charge.refunded","data":{"object":{}}}"#).unwrap();
        assert_eq!(other.kind(), EventKind::Other);
    }
}
