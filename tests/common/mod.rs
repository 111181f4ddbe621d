#![allow(dead_code)]

use chrono::{DateTime, Utc};
use secrecy::Secret;
use serde_json::{json, Value};

use payflow_service::config::{
    Config, DatabaseConfig, NotifierConfig, PaymobConfig, SchedulerConfig, ServerConfig,
};
use payflow_service::models::{InstallmentPlan, Order, OrderStatus, PlanStatus};
use payflow_service::services::LedgerStore;
use payflow_service::utils::signature;
use payflow_service::{AppState, Application};

/// "test_hmac_secret", hex-encoded the way the real dashboard hands it out.
pub const HMAC_SECRET: &str = "746573745f686d61635f736563726574";

pub fn test_config(gateway_base_url: &str) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Random port
        },
        database: DatabaseConfig {
            url: None, // In-memory store
            max_connections: 5,
            min_connections: 1,
        },
        paymob: PaymobConfig {
            api_base_url: gateway_base_url.to_string(),
            secret_key: Secret::new("egy_sk_test_123".to_string()),
            public_key: "egy_pk_test_123".to_string(),
            hmac_secret: Secret::new(HMAC_SECRET.to_string()),
            integration_id: 111,
            moto_integration_id: 222,
            currency: "EGP".to_string(),
        },
        scheduler: SchedulerConfig {
            enabled: false,
            interval_secs: 1,
            charge_ttl_secs: 900,
        },
        notifier: NotifierConfig { url: None },
        service_name: "payflow-service-test".to_string(),
    }
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub state: AppState,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_gateway("http://127.0.0.1:9").await
    }

    pub async fn spawn_with_gateway(gateway_base_url: &str) -> Self {
        let app = Application::build(test_config(gateway_base_url))
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);
        let state = app.state();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            state,
        }
    }

    pub async fn seed_order(&self, id: i64, user_id: i64, total_minor: i64) {
        let now = Utc::now();
        self.state
            .store
            .create_order(Order {
                id,
                user_id,
                total_minor,
                status: OrderStatus::Pending,
                gateway_order_id: None,
                due_amount_minor: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("Failed to seed order");
    }

    pub async fn seed_plan(
        &self,
        order_id: i64,
        installment_count: i32,
        installments_paid: i32,
        installment_amount_minor: i64,
        next_due_date: Option<DateTime<Utc>>,
    ) {
        let now = Utc::now();
        self.state
            .store
            .create_plan(InstallmentPlan {
                order_id,
                installment_count,
                installments_paid,
                installment_amount_minor,
                status: PlanStatus::Ongoing,
                next_due_date,
                charge_in_flight_until: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("Failed to seed plan");
    }

    /// POST a signed TRANSACTION callback.
    pub async fn post_transaction_webhook(&self, obj: &Value) -> reqwest::Response {
        self.post_signed_webhook("TRANSACTION", obj, &signature::TRANSACTION_HMAC_FIELDS)
            .await
    }

    /// POST a signed TOKEN callback.
    pub async fn post_token_webhook(&self, obj: &Value) -> reqwest::Response {
        self.post_signed_webhook("TOKEN", obj, &signature::TOKEN_HMAC_FIELDS)
            .await
    }

    async fn post_signed_webhook(
        &self,
        event_type: &str,
        obj: &Value,
        fields: &[&str],
    ) -> reqwest::Response {
        let hmac = webhook_hmac(obj, fields);
        self.post_webhook_raw(event_type, obj, &hmac).await
    }

    /// POST a callback with an explicit hmac value (for tamper tests).
    pub async fn post_webhook_raw(
        &self,
        event_type: &str,
        obj: &Value,
        hmac: &str,
    ) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}/webhooks/paymob?hmac={}", self.address, hmac))
            .json(&json!({ "type": event_type, "obj": obj }))
            .send()
            .await
            .expect("Failed to post webhook")
    }
}

pub fn webhook_hmac(obj: &Value, fields: &[&str]) -> String {
    signature::compute_hmac(HMAC_SECRET, &signature::canonical_string(obj, fields))
        .expect("Failed to compute webhook hmac")
}

/// A TRANSACTION callback object tagged the way intentions tag them.
pub fn transaction_obj(
    gateway_transaction_id: i64,
    success: bool,
    amount_minor: i64,
    payment_type: &str,
    order_id: Option<i64>,
    user_id: Option<i64>,
) -> Value {
    let mut extra = serde_json::Map::new();
    extra.insert("payment_type".to_string(), json!(payment_type));
    if let Some(order_id) = order_id {
        extra.insert("order_id".to_string(), json!(order_id));
    }
    if let Some(user_id) = user_id {
        extra.insert("user_id".to_string(), json!(user_id));
    }

    json!({
        "id": gateway_transaction_id,
        "pending": false,
        "success": success,
        "amount_cents": amount_minor,
        "currency": "EGP",
        "error_occured": false,
        "has_parent_transaction": false,
        "integration_id": 111,
        "is_3d_secure": true,
        "is_auth": false,
        "is_capture": false,
        "is_refunded": false,
        "is_standalone_payment": true,
        "is_voided": false,
        "owner": 812,
        "created_at": "2024-03-01T10:00:00.000000",
        "order": {
            "id": order_id.map(|id| id + 9000).unwrap_or(9999),
            "merchant_order_id": order_id.map(|id| format!("ord-{}", id)),
            "items": []
        },
        "source_data": { "pan": "2346", "sub_type": "MasterCard", "type": "card" },
        "payment_key_claims": { "extra": extra }
    })
}
