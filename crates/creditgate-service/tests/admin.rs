//! Administrative integration tests.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use creditgate_core::Plan;
use serde_json::json;

// ============================================================================
// Adjustments
// ============================================================================

#[tokio::test]
async fn top_up_lifts_low_balance_block() {
    let harness = TestHarness::new();
    harness.open_funded(Plan::Enterprise, 500).await;

    let response = harness
        .as_admin(harness.server.post("/v1/admin/adjust"))
        .json(&json!({
            "subscriber_id": harness.subscriber_id.to_string(),
            "target": "purchased_balance",
            "amount": 5000,
            "reason": "checkout"
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["purchased_balance"], 5500);

    let response = harness
        .as_subscriber(harness.server.post("/v1/guard/check"))
        .json(&json!({ "feature": "chat" }))
        .await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["decision"], "approved");
}

#[tokio::test]
async fn adjust_requires_admin_role() {
    let harness = TestHarness::new();
    harness.open_funded(Plan::Standard, 0).await;

    let response = harness
        .as_subscriber(harness.server.post("/v1/admin/adjust"))
        .json(&json!({
            "subscriber_id": harness.subscriber_id.to_string(),
            "target": "purchased_balance",
            "amount": 5000,
            "reason": "free money"
        }))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(harness.purchased_balance().await, 0);
}

#[tokio::test]
async fn adjust_rejects_non_positive_amount() {
    let harness = TestHarness::new();
    harness.open_funded(Plan::Standard, 100).await;

    let response = harness
        .as_admin(harness.server.post("/v1/admin/adjust"))
        .json(&json!({
            "subscriber_id": harness.subscriber_id.to_string(),
            "target": "purchased_balance",
            "amount": -50,
            "reason": "clawback"
        }))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(harness.purchased_balance().await, 100);
}

#[tokio::test]
async fn adjust_unknown_subscriber_is_not_found() {
    let harness = TestHarness::new();

    let response = harness
        .as_admin(harness.server.post("/v1/admin/adjust"))
        .json(&json!({
            "subscriber_id": harness.subscriber_id.to_string(),
            "target": "monthly_allowance",
            "amount": 10,
            "reason": "goodwill"
        }))
        .await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn reset_monthly_restores_plan_allowance() {
    let harness = TestHarness::new();
    harness.open_funded(Plan::Standard, 0).await;

    harness
        .as_admin(harness.server.post("/v1/admin/adjust"))
        .json(&json!({
            "subscriber_id": harness.subscriber_id.to_string(),
            "target": "monthly_allowance",
            "amount": 1000,
            "reason": "promo"
        }))
        .await
        .assert_status_ok();

    let response = harness
        .as_admin(harness.server.post("/v1/admin/reset-monthly"))
        .json(&json!({ "subscriber_id": harness.subscriber_id.to_string() }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["monthly_allowance"], 2500);
}

// ============================================================================
// Audit
// ============================================================================

#[tokio::test]
async fn audit_lists_newest_first() {
    let harness = TestHarness::new();
    harness.open_funded(Plan::Standard, 10_000).await;

    harness
        .as_subscriber(harness.server.post("/v1/metered"))
        .json(&json!({ "feature": "chat" }))
        .await
        .assert_status_ok();

    let path = format!("/v1/admin/audit/{}", harness.subscriber_id);
    let response = harness.as_admin(harness.server.get(&path)).await;

    response.assert_status_ok();
    let body: Vec<serde_json::Value> = response.json();
    assert_eq!(body.len(), 2);
    assert_eq!(body[0]["type"], "usage");
    assert_eq!(body[0]["outcome"], "charged");
    assert_eq!(body[1]["type"], "adjustment");
    assert_eq!(body[1]["actor"], "harness");
}

#[tokio::test]
async fn audit_paginates() {
    let harness = TestHarness::new();
    harness.open_funded(Plan::Standard, 10_000).await;

    for _ in 0..3 {
        harness
            .as_subscriber(harness.server.post("/v1/metered"))
            .json(&json!({ "feature": "chat" }))
            .await
            .assert_status_ok();
    }

    let path = format!("/v1/admin/audit/{}", harness.subscriber_id);
    let response = harness
        .as_admin(harness.server.get(&path))
        .add_query_param("limit", 2)
        .add_query_param("offset", 2)
        .await;

    let body: Vec<serde_json::Value> = response.json();
    assert_eq!(body.len(), 2);
    assert_eq!(body[0]["type"], "usage");
    assert_eq!(body[1]["type"], "adjustment");
}

#[tokio::test]
async fn audit_requires_admin_role() {
    let harness = TestHarness::new();
    harness.open_funded(Plan::Standard, 0).await;

    let path = format!("/v1/admin/audit/{}", harness.subscriber_id);
    let response = harness.as_subscriber(harness.server.get(&path)).await;

    response.assert_status(StatusCode::FORBIDDEN);
}
