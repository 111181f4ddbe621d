//! Paymob payment gateway client.
//!
//! Implements the intention API for payment initiation and the pay API for
//! unattended token charges, plus webhook payload parsing. The rest of the
//! service only sees the `PaymentGateway` trait and the normalized
//! notification type, so the reconciler and scheduler stay gateway-agnostic.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::PaymobConfig;
use crate::error::AppError;
use crate::models::TransactionKind;

/// Charge capability consumed by handlers and the installment scheduler.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Register an intent to charge; returns a short-lived payment token.
    async fn create_intention(&self, request: IntentionRequest) -> Result<Intention, AppError>;

    /// Execute an off-session charge with a saved card token and a payment
    /// token from a prior intention.
    async fn charge_with_token(
        &self,
        credential_token: &str,
        payment_token: &str,
    ) -> Result<TokenCharge, AppError>;
}

/// Which integration credentials a charge runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeMode {
    /// Payer-present checkout.
    Interactive,
    /// Card-not-present charge fired by the scheduler.
    Unattended,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillingData {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl BillingData {
    /// The gateway rejects intentions with blank contact fields; fail before
    /// the round trip.
    fn validate(&self) -> Result<(), AppError> {
        for (field, value) in [
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
            ("email", &self.email),
            ("phone_number", &self.phone_number),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Missing required billing field: {}",
                    field
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct IntentionRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub billing: BillingData,
    /// Echoed back by the gateway inside `payment_key_claims.extra`; the
    /// reconciler dispatches on it.
    pub order_id: Option<i64>,
    pub payment_type: TransactionKind,
    pub user_id: Option<i64>,
    pub merchant_order_id: Option<String>,
    pub item_description: Option<String>,
    pub mode: ChargeMode,
    /// Ask the gateway to tokenize and push the card via a TOKEN callback.
    pub save_card: bool,
}

/// Result of a successful intention creation.
#[derive(Debug, Clone)]
pub struct Intention {
    pub id: String,
    pub client_secret: String,
    /// Short-lived token used to complete the charge.
    pub payment_token: String,
    pub raw: Value,
}

/// Result of an unattended token charge.
#[derive(Debug, Clone)]
pub struct TokenCharge {
    pub gateway_transaction_id: String,
    pub success: bool,
    pub pending: bool,
    pub raw: Value,
}

#[derive(Debug, Deserialize)]
struct IntentionResponse {
    id: String,
    client_secret: String,
    #[serde(default)]
    payment_keys: Vec<PaymentKey>,
}

#[derive(Debug, Deserialize)]
struct PaymentKey {
    key: String,
}

#[derive(Clone)]
pub struct PaymobClient {
    client: Client,
    config: PaymobConfig,
}

impl PaymobClient {
    pub fn new(config: PaymobConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<(bool, Value), AppError> {
        let response = self
            .client
            .post(url)
            .header(
                "Authorization",
                format!("Token {}", self.config.secret_key.expose_secret()),
            )
            .json(body)
            .send()
            .await
            .map_err(AppError::gateway_transport)?;

        let status = response.status();
        let text = response.text().await.map_err(AppError::gateway_transport)?;

        tracing::debug!(url = %url, status = %status, body = %text, "Paymob response");

        let parsed: Value = serde_json::from_str(&text)
            .unwrap_or_else(|_| Value::String(text.clone()));

        Ok((status.is_success(), parsed))
    }
}

#[async_trait]
impl PaymentGateway for PaymobClient {
    async fn create_intention(&self, request: IntentionRequest) -> Result<Intention, AppError> {
        if !self.is_configured() {
            return Err(AppError::gateway_rejection(
                "Paymob credentials not configured",
                None,
            ));
        }
        request.billing.validate()?;

        let integration_id = match request.mode {
            ChargeMode::Interactive => self.config.integration_id,
            ChargeMode::Unattended => self.config.moto_integration_id,
        };

        let mut extras = serde_json::Map::new();
        extras.insert(
            "payment_type".to_string(),
            Value::String(request.payment_type.as_str().to_string()),
        );
        if let Some(order_id) = request.order_id {
            extras.insert("order_id".to_string(), Value::from(order_id));
        }
        if let Some(user_id) = request.user_id {
            extras.insert("user_id".to_string(), Value::from(user_id));
        }

        let body = serde_json::json!({
            "amount": request.amount_minor,
            "currency": request.currency,
            "payment_methods": [integration_id],
            "items": [{
                "name": request.merchant_order_id.clone()
                    .unwrap_or_else(|| format!("{} charge", request.payment_type)),
                "amount": request.amount_minor,
                "description": request.item_description.clone().unwrap_or_default(),
                "quantity": 1,
            }],
            "billing_data": request.billing,
            "extras": extras,
            "special_reference": request.merchant_order_id,
            "card_tokenize": request.save_card,
        });

        let url = format!("{}/v1/intention/", self.config.api_base_url);
        let (ok, raw) = self.post_json(&url, &body).await?;

        if !ok {
            tracing::error!(body = %raw, "Paymob intention creation failed");
            return Err(AppError::gateway_rejection(
                "intention creation rejected",
                Some(raw),
            ));
        }

        let parsed: IntentionResponse = serde_json::from_value(raw.clone()).map_err(|e| {
            AppError::gateway_rejection(format!("malformed intention response: {}", e), Some(raw.clone()))
        })?;

        let payment_token = parsed
            .payment_keys
            .first()
            .map(|k| k.key.clone())
            .ok_or_else(|| {
                AppError::gateway_rejection("intention response carried no payment key", Some(raw.clone()))
            })?;

        tracing::info!(
            intention_id = %parsed.id,
            amount_minor = request.amount_minor,
            payment_type = %request.payment_type,
            "Paymob intention created"
        );

        Ok(Intention {
            id: parsed.id,
            client_secret: parsed.client_secret,
            payment_token,
            raw,
        })
    }

    async fn charge_with_token(
        &self,
        credential_token: &str,
        payment_token: &str,
    ) -> Result<TokenCharge, AppError> {
        if !self.is_configured() {
            return Err(AppError::gateway_rejection(
                "Paymob credentials not configured",
                None,
            ));
        }

        let body = serde_json::json!({
            "source": { "identifier": credential_token, "subtype": "TOKEN" },
            "payment_token": payment_token,
        });

        let url = format!("{}/api/acceptance/payments/pay", self.config.api_base_url);
        let (ok, raw) = self.post_json(&url, &body).await?;

        if !ok {
            tracing::error!(body = %raw, "Paymob token charge failed");
            return Err(AppError::gateway_rejection("token charge rejected", Some(raw)));
        }

        let gateway_transaction_id = raw
            .get("id")
            .map(render_id)
            .ok_or_else(|| {
                AppError::gateway_rejection("token charge response carried no id", Some(raw.clone()))
            })?;
        let success = raw.get("success").and_then(Value::as_bool).unwrap_or(false);
        let pending = raw.get("pending").and_then(Value::as_bool).unwrap_or(false);

        tracing::info!(
            gateway_transaction_id = %gateway_transaction_id,
            success,
            pending,
            "Paymob token charge submitted"
        );

        Ok(TokenCharge {
            gateway_transaction_id,
            success,
            pending,
            raw,
        })
    }
}

/// Inbound webhook payload, dispatched on the gateway's `type` tag.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    /// Charge outcome for a prior intention.
    Transaction(Value),
    /// Card token pushed after a charge that saved the card.
    Token(Value),
}

pub fn parse_webhook_event(body: &str) -> Result<WebhookEvent, AppError> {
    let envelope: Value = serde_json::from_str(body)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid webhook payload: {}", e)))?;

    let kind = envelope
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Webhook payload missing type")))?;
    let obj = envelope
        .get("obj")
        .cloned()
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Webhook payload missing obj")))?;

    match kind {
        "TRANSACTION" => Ok(WebhookEvent::Transaction(obj)),
        "TOKEN" => Ok(WebhookEvent::Token(obj)),
        other => Err(AppError::BadRequest(anyhow::anyhow!(
            "Unsupported webhook type: {}",
            other
        ))),
    }
}

/// Gateway-agnostic view of a transaction callback, consumed by the
/// reconciler.
#[derive(Debug, Clone)]
pub struct GatewayNotification {
    pub kind: TransactionKind,
    pub success: bool,
    pub pending: bool,
    pub gateway_transaction_id: String,
    pub gateway_order_id: Option<String>,
    pub merchant_order_id: Option<String>,
    pub order_id: Option<i64>,
    pub user_id: Option<i64>,
    pub amount_minor: i64,
    pub raw: Value,
}

/// Extract the reconciler's view from a TRANSACTION callback object.
///
/// The payment type and order id normally ride in the echoed
/// `payment_key_claims.extra`; payment-link charges carry neither, so the
/// order id is parsed out of the free-text item description instead.
pub fn normalize_transaction(obj: &Value) -> Result<GatewayNotification, AppError> {
    let gateway_transaction_id = obj
        .get("id")
        .map(render_id)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Transaction callback missing id")))?;

    let extra = obj.pointer("/payment_key_claims/extra");
    let payment_type = extra
        .and_then(|e| e.get("payment_type"))
        .and_then(Value::as_str)
        .and_then(TransactionKind::from_string);
    let mut order_id = extra.and_then(|e| e.get("order_id")).and_then(as_i64_lenient);
    let user_id = extra.and_then(|e| e.get("user_id")).and_then(as_i64_lenient);

    let item_description = obj
        .pointer("/order/items/0/description")
        .and_then(Value::as_str);

    let kind = match payment_type {
        Some(kind) => kind,
        None => {
            // No echoed tag: only payment links legitimately arrive untagged.
            order_id = item_description.and_then(parse_order_ref);
            if order_id.is_some() {
                TransactionKind::PaymentLink
            } else {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Transaction callback carries no payment type and no parsable order reference"
                )));
            }
        }
    };

    if kind == TransactionKind::PaymentLink && order_id.is_none() {
        order_id = item_description.and_then(parse_order_ref);
    }

    Ok(GatewayNotification {
        kind,
        success: obj.get("success").and_then(Value::as_bool).unwrap_or(false),
        pending: obj.get("pending").and_then(Value::as_bool).unwrap_or(false),
        gateway_transaction_id,
        gateway_order_id: obj.pointer("/order/id").map(render_id),
        merchant_order_id: obj
            .pointer("/order/merchant_order_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        order_id,
        user_id,
        amount_minor: obj.get("amount_cents").and_then(Value::as_i64).unwrap_or(0),
        raw: obj.clone(),
    })
}

/// Pull the first integer following the word "order" out of free text, e.g.
/// "Payment link for Order #1042".
pub fn parse_order_ref(text: &str) -> Option<i64> {
    let lower = text.to_lowercase();
    let idx = lower.find("order")?;
    let tail = &text[idx + "order".len()..];
    let digits: String = tail
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn render_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_i64_lenient(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_order_ref_from_free_text() {
        assert_eq!(parse_order_ref("Payment for Order #1042"), Some(1042));
        assert_eq!(parse_order_ref("order:77, thanks"), Some(77));
        assert_eq!(parse_order_ref("ORDER 9"), Some(9));
        assert_eq!(parse_order_ref("no reference here"), None);
        assert_eq!(parse_order_ref("order without digits"), None);
    }

    #[test]
    fn normalizes_tagged_transaction() {
        let obj = json!({
            "id": 5001,
            "success": true,
            "pending": false,
            "amount_cents": 12500,
            "order": { "id": 800, "merchant_order_id": "ord-100" },
            "payment_key_claims": {
                "extra": { "payment_type": "EMI", "order_id": 100, "user_id": 7 }
            }
        });

        let n = normalize_transaction(&obj).unwrap();
        assert_eq!(n.kind, TransactionKind::Emi);
        assert!(n.success);
        assert_eq!(n.gateway_transaction_id, "5001");
        assert_eq!(n.gateway_order_id.as_deref(), Some("800"));
        assert_eq!(n.merchant_order_id.as_deref(), Some("ord-100"));
        assert_eq!(n.order_id, Some(100));
        assert_eq!(n.user_id, Some(7));
        assert_eq!(n.amount_minor, 12500);
    }

    #[test]
    fn untagged_transaction_falls_back_to_payment_link() {
        let obj = json!({
            "id": "txn_9",
            "success": true,
            "amount_cents": 300,
            "order": {
                "id": 801,
                "items": [{ "name": "link", "description": "Settling order 42" }]
            }
        });

        let n = normalize_transaction(&obj).unwrap();
        assert_eq!(n.kind, TransactionKind::PaymentLink);
        assert_eq!(n.order_id, Some(42));
    }

    #[test]
    fn untagged_transaction_without_reference_is_rejected() {
        let obj = json!({
            "id": 1,
            "success": true,
            "order": { "items": [{ "description": "gift" }] }
        });
        assert!(normalize_transaction(&obj).is_err());
    }

    #[test]
    fn webhook_envelope_dispatch() {
        let body = r#"{"type":"TOKEN","obj":{"token":"tok_1","order_id":800}}"#;
        match parse_webhook_event(body).unwrap() {
            WebhookEvent::Token(obj) => {
                assert_eq!(obj.get("token").and_then(Value::as_str), Some("tok_1"))
            }
            _ => panic!("expected token event"),
        }

        assert!(parse_webhook_event(r#"{"type":"REFUND","obj":{}}"#).is_err());
        assert!(parse_webhook_event("not json").is_err());
    }
}
