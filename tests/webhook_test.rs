mod common;

use chrono::{Duration, Utc};
use common::{transaction_obj, webhook_hmac, TestApp};
use serde_json::json;

use payflow_service::models::{
    OrderStatus, PlanStatus, Transaction, TransactionKind, TransactionStatus,
};
use payflow_service::services::LedgerStore;
use payflow_service::utils::signature;

#[tokio::test]
async fn direct_charge_webhook_marks_order_paid() {
    let app = TestApp::spawn().await;
    app.seed_order(100, 7, 500).await;

    // The pending row recorded at intention time.
    let pending = Transaction::pending(TransactionKind::Direct, Some(100), Some(7), 500, None, None);
    app.state.store.create_transaction(pending).await.unwrap();

    let obj = transaction_obj(5001, true, 500, "DIRECT", Some(100), Some(7));
    let response = app.post_transaction_webhook(&obj).await;
    assert_eq!(response.status(), 200);

    let order = app.state.store.get_order(100).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);

    let (transactions, total) = app
        .state
        .store
        .list_transactions_by_user(7, 10, 0)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(transactions[0].status, TransactionStatus::Success);
    assert!(transactions[0].success);
    assert_eq!(transactions[0].gateway_transaction_id.as_deref(), Some("5001"));
}

#[tokio::test]
async fn advance_charge_leaves_order_status_alone() {
    let app = TestApp::spawn().await;
    app.seed_order(101, 7, 900).await;

    let pending =
        Transaction::pending(TransactionKind::Advance, Some(101), Some(7), 300, None, None);
    app.state.store.create_transaction(pending).await.unwrap();

    let obj = transaction_obj(5002, true, 300, "ADVANCE", Some(101), Some(7));
    let response = app.post_transaction_webhook(&obj).await;
    assert_eq!(response.status(), 200);

    // An advance is a partial payment against a still-open order.
    let order = app.state.store.get_order(101).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);

    let row = app
        .state
        .store
        .find_transaction_by_order(101, TransactionKind::Advance)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, TransactionStatus::Success);
}

#[tokio::test]
async fn tampered_webhook_is_rejected_without_touching_state() {
    let app = TestApp::spawn().await;
    app.seed_order(102, 7, 500).await;

    let obj = transaction_obj(5003, true, 500, "DIRECT", Some(102), Some(7));
    let hmac = webhook_hmac(&obj, &signature::TRANSACTION_HMAC_FIELDS);

    // Alter the amount after signing.
    let mut tampered = obj.clone();
    tampered["amount_cents"] = json!(1);

    let response = app.post_webhook_raw("TRANSACTION", &tampered, &hmac).await;
    assert_eq!(response.status(), 401);

    let order = app.state.store.get_order(102).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    let (_, total) = app
        .state
        .store
        .list_transactions_by_user(7, 10, 0)
        .await
        .unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn webhook_without_signature_is_rejected() {
    let app = TestApp::spawn().await;

    let obj = transaction_obj(5004, true, 500, "DIRECT", Some(103), Some(7));
    let response = reqwest::Client::new()
        .post(format!("{}/webhooks/paymob", app.address))
        .json(&json!({ "type": "TRANSACTION", "obj": obj }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn due_settlement_clears_due_amount_and_marks_paid() {
    let app = TestApp::spawn().await;
    app.seed_order(110, 8, 1000).await;
    app.state.store.update_order_due_amount(110, 400).await.unwrap();

    // No prior ledger row exists for a due settlement.
    let obj = transaction_obj(5100, true, 400, "DUE", Some(110), Some(8));
    let response = app.post_transaction_webhook(&obj).await;
    assert_eq!(response.status(), 200);

    let order = app.state.store.get_order(110).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.due_amount_minor, Some(0));

    let row = app
        .state
        .store
        .find_transaction_by_reference(TransactionKind::Due, "5100")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, TransactionStatus::Success);
}

#[tokio::test]
async fn replayed_success_webhook_is_a_noop() {
    let app = TestApp::spawn().await;
    app.seed_order(111, 8, 1000).await;

    let obj = transaction_obj(5101, true, 1000, "DUE", Some(111), Some(8));
    assert_eq!(app.post_transaction_webhook(&obj).await.status(), 200);
    assert_eq!(app.post_transaction_webhook(&obj).await.status(), 200);

    let (_, total) = app
        .state
        .store
        .list_transactions_by_user(8, 10, 0)
        .await
        .unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn first_emi_webhook_resolves_pending_row_and_pins_gateway_order() {
    let app = TestApp::spawn().await;
    app.seed_order(200, 9, 150_000).await;
    app.seed_plan(200, 6, 0, 25_000, Some(Utc::now() + Duration::days(30)))
        .await;

    let pending =
        Transaction::pending(TransactionKind::Emi, Some(200), Some(9), 25_000, None, None);
    app.state.store.create_transaction(pending).await.unwrap();

    let obj = transaction_obj(6000, true, 25_000, "EMI", Some(200), Some(9));
    let response = app.post_transaction_webhook(&obj).await;
    assert_eq!(response.status(), 200);

    // More installments remain: the order stays PENDING but now carries the
    // gateway order id for the scheduler's credential lookup.
    let order = app.state.store.get_order(200).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.gateway_order_id.as_deref(), Some("9200"));

    // The first installment does not advance the plan counter.
    let plan = app.state.store.get_plan(200).await.unwrap().unwrap();
    assert_eq!(plan.installments_paid, 0);

    // Redelivery resolves nothing and appends nothing.
    assert_eq!(app.post_transaction_webhook(&obj).await.status(), 200);
    let (_, total) = app
        .state
        .store
        .list_transactions_by_user(9, 10, 0)
        .await
        .unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn three_installments_complete_the_plan() {
    let app = TestApp::spawn().await;
    app.seed_order(201, 9, 75_000).await;
    app.seed_plan(201, 3, 0, 25_000, Some(Utc::now())).await;

    for (i, reference) in [6101i64, 6102, 6103].iter().enumerate() {
        let obj = transaction_obj(*reference, true, 25_000, "EMI", Some(201), Some(9));
        assert_eq!(app.post_transaction_webhook(&obj).await.status(), 200);

        let plan = app.state.store.get_plan(201).await.unwrap().unwrap();
        assert_eq!(plan.installments_paid, i as i32 + 1);

        if i < 2 {
            assert_eq!(plan.status, PlanStatus::Ongoing);
            let due = plan.next_due_date.expect("ongoing plan keeps a due date");
            assert!(due > Utc::now() + Duration::days(29));
            assert!(due < Utc::now() + Duration::days(31));
        } else {
            assert_eq!(plan.status, PlanStatus::Completed);
            assert!(plan.next_due_date.is_none());
        }
    }

    // Plan completion closes out the order.
    let order = app.state.store.get_order(201).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
}

#[tokio::test]
async fn failed_installment_schedules_next_day_retry() {
    let app = TestApp::spawn().await;
    app.seed_order(202, 9, 75_000).await;
    app.seed_plan(202, 3, 1, 25_000, Some(Utc::now())).await;

    let obj = transaction_obj(6200, false, 25_000, "EMI", Some(202), Some(9));
    assert_eq!(app.post_transaction_webhook(&obj).await.status(), 200);

    let plan = app.state.store.get_plan(202).await.unwrap().unwrap();
    assert_eq!(plan.installments_paid, 1);
    assert_eq!(plan.status, PlanStatus::Ongoing);

    let due = plan.next_due_date.expect("failed installment keeps the plan due");
    assert!(due > Utc::now() + Duration::hours(23));
    assert!(due < Utc::now() + Duration::hours(25));
}

#[tokio::test]
async fn duplicate_wallet_recharge_credits_once() {
    let app = TestApp::spawn().await;

    let obj = transaction_obj(7000, true, 2_000, "WALLET_RECHARGE", None, Some(42));
    assert_eq!(app.post_transaction_webhook(&obj).await.status(), 200);
    assert_eq!(app.post_transaction_webhook(&obj).await.status(), 200);

    let wallet = app.state.store.get_wallet(42).await.unwrap().unwrap();
    assert_eq!(wallet.balance_minor, 2_000);

    let entries = app.state.store.list_wallet_entries(42).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].balance_before_minor, 0);
    assert_eq!(entries[0].balance_after_minor, 2_000);

    let (_, total) = app
        .state
        .store
        .list_transactions_by_user(42, 10, 0)
        .await
        .unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn wallet_ledger_chains_balances_across_recharges() {
    let app = TestApp::spawn().await;

    for (reference, amount) in [(7101i64, 500i64), (7102, 1_500), (7103, 250)] {
        let obj = transaction_obj(reference, true, amount, "WALLET_RECHARGE", None, Some(43));
        assert_eq!(app.post_transaction_webhook(&obj).await.status(), 200);
    }

    let entries = app.state.store.list_wallet_entries(43).await.unwrap();
    assert_eq!(entries.len(), 3);
    for entry in &entries {
        assert_eq!(
            entry.balance_after_minor,
            entry.balance_before_minor + entry.amount_minor
        );
    }

    let wallet = app.state.store.get_wallet(43).await.unwrap().unwrap();
    assert_eq!(wallet.balance_minor, 2_250);
    assert_eq!(entries.last().unwrap().balance_after_minor, wallet.balance_minor);
}

#[tokio::test]
async fn failed_wallet_recharge_moves_nothing() {
    let app = TestApp::spawn().await;

    let obj = transaction_obj(7200, false, 2_000, "WALLET_RECHARGE", None, Some(44));
    assert_eq!(app.post_transaction_webhook(&obj).await.status(), 200);

    assert!(app.state.store.get_wallet(44).await.unwrap().is_none());
    let row = app
        .state
        .store
        .find_transaction_by_reference(TransactionKind::WalletRecharge, "7200")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, TransactionStatus::Failed);
}

#[tokio::test]
async fn payment_link_webhook_parses_order_from_item_description() {
    let app = TestApp::spawn().await;
    app.seed_order(300, 11, 800).await;

    let pending =
        Transaction::pending(TransactionKind::PaymentLink, Some(300), Some(11), 800, None, None);
    app.state.store.create_transaction(pending).await.unwrap();

    // Payment links arrive without echoed metadata; the order reference
    // rides in the item description.
    let obj = serde_json::json!({
        "id": 8000,
        "pending": false,
        "success": true,
        "amount_cents": 800,
        "currency": "EGP",
        "error_occured": false,
        "has_parent_transaction": false,
        "integration_id": 111,
        "is_3d_secure": false,
        "is_auth": false,
        "is_capture": false,
        "is_refunded": false,
        "is_standalone_payment": true,
        "is_voided": false,
        "owner": 812,
        "created_at": "2024-03-01T11:00:00.000000",
        "order": {
            "id": 9300,
            "items": [{ "name": "link", "description": "Payment link for Order #300" }]
        },
        "source_data": { "pan": "2346", "sub_type": "MasterCard", "type": "card" }
    });

    assert_eq!(app.post_transaction_webhook(&obj).await.status(), 200);

    let order = app.state.store.get_order(300).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
}

#[tokio::test]
async fn token_callback_saves_credential() {
    let app = TestApp::spawn().await;

    let obj = serde_json::json!({
        "card_subtype": "MasterCard",
        "created_at": "2024-03-01T10:05:00.000000",
        "email": "payer@example.com",
        "id": 5511,
        "masked_pan": "xxxx-xxxx-xxxx-2346",
        "merchant_id": 812,
        "order_id": 9200,
        "token": "tok_4f3c2a"
    });

    assert_eq!(app.post_token_webhook(&obj).await.status(), 200);

    let credential = app
        .state
        .store
        .get_credential("9200")
        .await
        .unwrap()
        .expect("credential saved");
    assert_eq!(credential.token, "tok_4f3c2a");

    // Credentials are immutable: a second push for the same gateway order
    // does not overwrite the first token.
    let replacement = serde_json::json!({
        "card_subtype": "Visa",
        "created_at": "2024-03-02T10:05:00.000000",
        "email": "payer@example.com",
        "id": 5512,
        "masked_pan": "xxxx-xxxx-xxxx-1111",
        "merchant_id": 812,
        "order_id": 9200,
        "token": "tok_other"
    });
    assert_eq!(app.post_token_webhook(&replacement).await.status(), 200);
    let credential = app.state.store.get_credential("9200").await.unwrap().unwrap();
    assert_eq!(credential.token, "tok_4f3c2a");
}

#[tokio::test]
async fn pending_transaction_callback_is_ignored() {
    let app = TestApp::spawn().await;
    app.seed_order(400, 12, 600).await;

    let mut obj = transaction_obj(9001, false, 600, "DIRECT", Some(400), Some(12));
    obj["pending"] = json!(true);

    assert_eq!(app.post_transaction_webhook(&obj).await.status(), 200);

    let (_, total) = app
        .state
        .store
        .list_transactions_by_user(12, 10, 0)
        .await
        .unwrap();
    assert_eq!(total, 0);
}
