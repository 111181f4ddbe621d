//! Webhook HMAC verification.
//!
//! The gateway signs each callback over a fixed, alphabetically-ordered set
//! of response fields. The canonical form is `key=value&key=value...` with
//! missing fields rendered as empty strings, HMAC-SHA256 keyed with the
//! pre-shared secret (hex-decoded to raw bytes), hex-encoded and uppercased.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Signed fields of a TRANSACTION callback, in canonical order.
pub const TRANSACTION_HMAC_FIELDS: [&str; 20] = [
    "amount_cents",
    "created_at",
    "currency",
    "error_occured",
    "has_parent_transaction",
    "id",
    "integration_id",
    "is_3d_secure",
    "is_auth",
    "is_capture",
    "is_refunded",
    "is_standalone_payment",
    "is_voided",
    "order.id",
    "owner",
    "pending",
    "source_data.pan",
    "source_data.sub_type",
    "source_data.type",
    "success",
];

/// Signed fields of a TOKEN (card-save) callback, in canonical order.
pub const TOKEN_HMAC_FIELDS: [&str; 8] = [
    "card_subtype",
    "created_at",
    "email",
    "id",
    "masked_pan",
    "merchant_id",
    "order_id",
    "token",
];

/// Walk a dotted path ("order.id") into the callback object.
fn lookup<'a>(obj: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = obj;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn render(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Build the canonical `key=value&...` string for a callback object.
pub fn canonical_string(obj: &Value, fields: &[&str]) -> String {
    fields
        .iter()
        .map(|field| format!("{}={}", field, render(lookup(obj, field))))
        .collect::<Vec<_>>()
        .join("&")
}

/// Compute the uppercased hex HMAC-SHA256 digest of the canonical string.
pub fn compute_hmac(secret_hex: &str, canonical: &str) -> Result<String, AppError> {
    let key = hex::decode(secret_hex.trim())
        .map_err(|_| AppError::Authenticity(anyhow::anyhow!("HMAC secret is not valid hex")))?;

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|_| AppError::Authenticity(anyhow::anyhow!("Invalid HMAC key length")))?;
    mac.update(canonical.as_bytes());

    Ok(hex::encode(mac.finalize().into_bytes()).to_uppercase())
}

/// Verify a callback signature in constant time.
pub fn verify(
    secret_hex: &str,
    obj: &Value,
    fields: &[&str],
    provided: &str,
) -> Result<bool, AppError> {
    let expected = compute_hmac(secret_hex, &canonical_string(obj, fields))?;
    let provided = provided.trim().to_uppercase();

    let expected_bytes = expected.as_bytes();
    let provided_bytes = provided.as_bytes();

    if expected_bytes.len() != provided_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(provided_bytes).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "6f70656e7365736d65";

    fn transaction_obj() -> Value {
        json!({
            "amount_cents": 50000,
            "created_at": "2024-03-01T10:00:00.000000",
            "currency": "EGP",
            "error_occured": false,
            "has_parent_transaction": false,
            "id": 9912345,
            "integration_id": 44721,
            "is_3d_secure": true,
            "is_auth": false,
            "is_capture": false,
            "is_refunded": false,
            "is_standalone_payment": true,
            "is_voided": false,
            "order": { "id": 223344 },
            "owner": 812,
            "pending": false,
            "source_data": { "pan": "2346", "sub_type": "MasterCard", "type": "card" },
            "success": true
        })
    }

    #[test]
    fn canonical_string_orders_fields_and_renders_missing_as_empty() {
        let obj = json!({ "amount_cents": 100, "success": true });
        let canonical = canonical_string(&obj, &TRANSACTION_HMAC_FIELDS);

        assert!(canonical.starts_with("amount_cents=100&created_at=&"));
        assert!(canonical.ends_with("&success=true"));
        assert!(canonical.contains("order.id=&"));
    }

    #[test]
    fn signature_round_trip() {
        let obj = transaction_obj();
        let digest = compute_hmac(SECRET, &canonical_string(&obj, &TRANSACTION_HMAC_FIELDS)).unwrap();

        assert_eq!(digest, digest.to_uppercase());
        assert!(verify(SECRET, &obj, &TRANSACTION_HMAC_FIELDS, &digest).unwrap());
        // Lowercase input is accepted too.
        assert!(verify(SECRET, &obj, &TRANSACTION_HMAC_FIELDS, &digest.to_lowercase()).unwrap());
    }

    #[test]
    fn tampered_amount_fails_verification() {
        let obj = transaction_obj();
        let digest = compute_hmac(SECRET, &canonical_string(&obj, &TRANSACTION_HMAC_FIELDS)).unwrap();

        let mut tampered = obj.clone();
        tampered["amount_cents"] = json!(1);
        assert!(!verify(SECRET, &tampered, &TRANSACTION_HMAC_FIELDS, &digest).unwrap());
    }

    #[test]
    fn missing_field_is_not_a_bypass() {
        let mut obj = transaction_obj();
        let digest = compute_hmac(SECRET, &canonical_string(&obj, &TRANSACTION_HMAC_FIELDS)).unwrap();

        obj.as_object_mut().unwrap().remove("owner");
        assert!(!verify(SECRET, &obj, &TRANSACTION_HMAC_FIELDS, &digest).unwrap());
    }

    #[test]
    fn non_hex_secret_is_rejected() {
        let obj = transaction_obj();
        assert!(verify("not-hex", &obj, &TRANSACTION_HMAC_FIELDS, "ABCD").is_err());
    }

    #[test]
    fn token_fields_sign_independently() {
        let obj = json!({
            "card_subtype": "MasterCard",
            "created_at": "2024-03-01T10:05:00.000000",
            "email": "payer@example.com",
            "id": 5511,
            "masked_pan": "xxxx-xxxx-xxxx-2346",
            "merchant_id": 812,
            "order_id": "223344",
            "token": "tok_4f3c2a"
        });
        let digest = compute_hmac(SECRET, &canonical_string(&obj, &TOKEN_HMAC_FIELDS)).unwrap();
        assert!(verify(SECRET, &obj, &TOKEN_HMAC_FIELDS, &digest).unwrap());
    }
}
