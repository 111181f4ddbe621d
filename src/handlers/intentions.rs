//! Payment intention handlers.
//!
//! Create a gateway intention for an interactive charge and, for the kinds
//! with an authoritative per-order ledger row, record the pending attempt
//! that the webhook reconciler later resolves.

use axum::{extract::State, http::StatusCode, Json};
use validator::Validate;

use crate::{
    dtos::{CreateIntentionRequest, CreateIntentionResponse},
    error::AppError,
    models::{Transaction, TransactionKind},
    services::paymob::{ChargeMode, IntentionRequest},
    AppState,
};

/// Create an intention for a single interactive charge
/// (DIRECT / ADVANCE / DUE / PAYMENT_LINK / WALLET_RECHARGE).
pub async fn create_intention(
    State(state): State<AppState>,
    Json(payload): Json<CreateIntentionRequest>,
) -> Result<(StatusCode, Json<CreateIntentionResponse>), AppError> {
    let kind = payload.payment_type.unwrap_or(TransactionKind::Direct);
    if kind == TransactionKind::Emi {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "EMI intentions go through the EMI endpoint"
        )));
    }
    build_intention(state, payload, kind, false).await
}

/// Create the first-installment intention for an order enrolled in
/// recurring billing. Identical shape, forced EMI tag, and the gateway is
/// asked to tokenize the card for the scheduler's later off-session
/// charges.
pub async fn create_emi_intention(
    State(state): State<AppState>,
    Json(payload): Json<CreateIntentionRequest>,
) -> Result<(StatusCode, Json<CreateIntentionResponse>), AppError> {
    build_intention(state, payload, TransactionKind::Emi, true).await
}

async fn build_intention(
    state: AppState,
    payload: CreateIntentionRequest,
    kind: TransactionKind,
    save_card: bool,
) -> Result<(StatusCode, Json<CreateIntentionResponse>), AppError> {
    payload.validate()?;

    if kind == TransactionKind::WalletRecharge {
        if payload.user_id.is_none() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Wallet recharge requires a user_id"
            )));
        }
    } else if payload.order_id.is_none() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "{} intention requires an order_id",
            kind
        )));
    }

    tracing::info!(
        kind = %kind,
        order_id = ?payload.order_id,
        amount_minor = payload.amount_minor,
        "Creating payment intention"
    );

    let intention = state
        .gateway
        .create_intention(IntentionRequest {
            amount_minor: payload.amount_minor,
            currency: state.config.paymob.currency.clone(),
            billing: payload.billing.into(),
            order_id: payload.order_id,
            payment_type: kind,
            user_id: payload.user_id,
            merchant_order_id: payload.merchant_order_id.clone(),
            item_description: payload.description.clone(),
            mode: ChargeMode::Interactive,
            save_card,
        })
        .await?;

    // DUE settlements and wallet top-ups are ledgered when their webhook
    // arrives; the other kinds get their authoritative pending row now.
    let transaction_id = if matches!(
        kind,
        TransactionKind::Direct
            | TransactionKind::Advance
            | TransactionKind::PaymentLink
            | TransactionKind::Emi
    ) {
        let transaction = Transaction::pending(
            kind,
            payload.order_id,
            payload.user_id,
            payload.amount_minor,
            None,
            payload.merchant_order_id.clone(),
        );
        let id = transaction.id;
        state.store.create_transaction(transaction).await?;
        Some(id)
    } else {
        None
    };

    tracing::info!(
        intention_id = %intention.id,
        transaction_id = ?transaction_id,
        "Payment intention created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateIntentionResponse {
            transaction_id,
            intention_id: intention.id,
            client_secret: intention.client_secret,
            payment_token: intention.payment_token,
            public_key: state.config.paymob.public_key.clone(),
            amount_minor: payload.amount_minor,
            currency: state.config.paymob.currency.clone(),
        }),
    ))
}
