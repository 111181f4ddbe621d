//! Gateway webhook handlers.
//!
//! The webhook endpoint is unauthenticated; authenticity comes from the
//! HMAC carried in the query string, verified before the ledger is touched.
//! Processed (including replayed) callbacks answer 200; persistence
//! failures answer non-2xx so the gateway redelivers.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::AppError,
    services::paymob::{normalize_transaction, parse_webhook_event, WebhookEvent},
    utils::signature,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct WebhookParams {
    pub hmac: Option<String>,
}

pub async fn paymob_webhook(
    State(state): State<AppState>,
    Query(params): Query<WebhookParams>,
    body: String,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let event = parse_webhook_event(&body)?;

    match event {
        WebhookEvent::Transaction(obj) => {
            verify_callback(&state, &params, &obj, &signature::TRANSACTION_HMAC_FIELDS)?;

            let notification = normalize_transaction(&obj)?;
            let outcome = state.reconciler.apply(notification).await?;

            Ok((
                StatusCode::OK,
                Json(json!({ "status": true, "outcome": format!("{:?}", outcome) })),
            ))
        }
        WebhookEvent::Token(obj) => {
            verify_callback(&state, &params, &obj, &signature::TOKEN_HMAC_FIELDS)?;

            state.reconciler.save_card_token(&obj).await?;

            Ok((StatusCode::OK, Json(json!({ "status": true }))))
        }
    }
}

fn verify_callback(
    state: &AppState,
    params: &WebhookParams,
    obj: &Value,
    fields: &[&str],
) -> Result<(), AppError> {
    let provided = params.hmac.as_deref().ok_or_else(|| {
        tracing::warn!("Webhook arrived without an hmac parameter");
        AppError::Authenticity(anyhow::anyhow!("Missing webhook signature"))
    })?;

    let secret = state.config.paymob.hmac_secret.expose_secret();
    if !signature::verify(secret, obj, fields, provided)? {
        tracing::warn!("Webhook signature verification failed");
        metrics::counter!("payflow_webhooks_rejected_total").increment(1);
        return Err(AppError::Authenticity(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    Ok(())
}
