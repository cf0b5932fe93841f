//! Signature round-trip tests over the delivery envelope wire format.

use chrono::Utc;
use uuid::Uuid;

use fanout_webhooks::crypto::{
    compute_signature, decrypt_secret, encrypt_secret, signature_header_value, verify_signature,
};
use fanout_webhooks::DeliveryEnvelope;

fn sample_envelope() -> DeliveryEnvelope {
    DeliveryEnvelope {
        event_id: Uuid::now_v7(),
        event_type: "organization.created".to_string(),
        occurred_at: Utc::now(),
        aggregate_type: "organization".to_string(),
        aggregate_id: Uuid::new_v4(),
        data: serde_json::json!({"name": "Acme", "plan": "pro"}),
    }
}

#[test]
fn sign_then_verify_round_trip() {
    let body = sample_envelope().to_bytes().unwrap();
    let header = signature_header_value("whsec_1", &body);

    assert!(verify_signature(&header, "whsec_1", &body));
}

#[test]
fn verify_fails_with_different_secret() {
    let body = sample_envelope().to_bytes().unwrap();
    let header = signature_header_value("whsec_1", &body);

    assert!(!verify_signature(&header, "whsec_2", &body));
}

#[test]
fn verify_fails_on_modified_body() {
    let envelope = sample_envelope();
    let body = envelope.to_bytes().unwrap();
    let header = signature_header_value("whsec_1", &body);

    let mut tampered = envelope;
    tampered.data = serde_json::json!({"name": "Mallory"});
    let tampered_body = tampered.to_bytes().unwrap();

    assert!(!verify_signature(&header, "whsec_1", &tampered_body));
}

#[test]
fn header_value_uses_sha256_prefix_and_hex_digest() {
    let body = b"{}";
    let header = signature_header_value("secret", body);

    let digest = header.strip_prefix("sha256=").expect("prefix missing");
    assert_eq!(digest.len(), 64);
    assert_eq!(digest, compute_signature("secret", body));
}

#[test]
fn encrypted_secret_still_signs_correctly_after_round_trip() {
    let key = [7u8; 32];
    let stored = encrypt_secret("whsec_rotated", &key).unwrap();
    let recovered = decrypt_secret(&stored, &key).unwrap();

    let body = sample_envelope().to_bytes().unwrap();
    let header = signature_header_value(&recovered, &body);
    assert!(verify_signature(&header, "whsec_rotated", &body));
}
