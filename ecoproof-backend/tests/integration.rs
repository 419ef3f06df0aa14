use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;

use ecoproof_backend::{app_router, spawn_balance_projector, AppState};
use ecoproof_common::{EmissionFactorTable, MultiplierTable};
use ecoproof_extraction::{ExtractionClient, MockExtractionClient};
use ecoproof_ledger::{MockLedger, TokenLedger};
use ecoproof_store::ActionStore;
use ecoproof_test_fixtures::{bill_text, FailingExtractionClient, FailingLedger, SAMPLE_BILL_450};
use ecoproof_verifier::{ImpactEstimator, VerificationOrchestrator, VerifierConfig};

const BODY_LIMIT: usize = usize::MAX;

fn state_with(
    store: ActionStore,
    extraction: Box<dyn ExtractionClient>,
    ledger: Arc<dyn TokenLedger>,
    config: VerifierConfig,
) -> AppState {
    let estimator = ImpactEstimator::new(EmissionFactorTable::default());
    let orchestrator = Arc::new(VerificationOrchestrator::new(
        config,
        extraction,
        estimator.clone(),
    ));
    let (state, receiver) = AppState::with_components(
        store,
        orchestrator,
        estimator,
        ledger,
        MultiplierTable::default(),
    );
    spawn_balance_projector(state.store().clone(), receiver);
    state
}

fn default_app() -> Router {
    let extraction = Box::new(
        MockExtractionClient::new()
            .with_delay(Duration::from_millis(1))
            .with_bill_text(SAMPLE_BILL_450),
    );
    let ledger = Arc::new(MockLedger::new(Duration::from_millis(1)));
    app_router(state_with(
        ActionStore::in_memory(),
        extraction,
        ledger,
        VerifierConfig::default(),
    ))
}

async fn request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), BODY_LIMIT).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn submit(app: &Router, body: Value) -> String {
    let (status, payload) = request(app, "POST", "/eco/actions", Some(body)).await;
    assert_eq!(status, StatusCode::OK, "submit failed: {payload}");
    payload["action_id"].as_str().unwrap().to_string()
}

fn energy_submission(kwh: f64) -> Value {
    json!({
        "owner_id": "user-1",
        "category": "energy",
        "data": { "kwh": kwh },
        "image_ref": "bills/jan.png",
        "payout_address": "0x00000000000000000000000000000000000000aa"
    })
}

#[tokio::test]
async fn health_reports_service_name() {
    let app = default_app();
    let (status, payload) = request(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["service"], "ecoproof-backend");
}

#[tokio::test]
async fn matching_bill_verifies_and_mints() {
    let app = default_app();
    let action_id = submit(&app, energy_submission(450.0)).await;

    let (status, payload) = request(
        &app,
        "POST",
        &format!("/eco/actions/{action_id}/verify"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["verified"], true, "payload: {payload}");
    assert!(payload["confidence"].as_f64().unwrap() > 0.7);
    let co2 = payload["estimated_co2_kg"].as_f64().unwrap();
    assert!((co2 - 187.2).abs() < 1e-6);
    assert_eq!(payload["tokens_issued"].as_u64(), Some(187));
    let tx_hash = payload["tx_hash"].as_str().unwrap();
    assert!(tx_hash.starts_with("0x"));
    assert_eq!(tx_hash.len(), 66);
    assert!(payload["error"].is_null());

    // The record store reflects the terminal state.
    let (status, action) =
        request(&app, "GET", &format!("/eco/actions/{action_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(action["status"], "verified");
    assert_eq!(action["tokens_issued"].as_u64(), Some(187));
    assert_eq!(action["tx_reference"].as_str(), Some(tx_hash));
}

#[tokio::test]
async fn missing_image_is_rejected_under_default_policy() {
    let app = default_app();
    let action_id = submit(
        &app,
        json!({
            "owner_id": "user-1",
            "category": "energy",
            "data": { "kwh": 450.0 }
        }),
    )
    .await;

    let (status, payload) = request(
        &app,
        "POST",
        &format!("/eco/actions/{action_id}/verify"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["verified"], false);
    assert!(payload["analysis"].as_str().unwrap().contains("no image provided"));
    assert_eq!(payload["tokens_issued"].as_u64(), Some(0));
}

#[tokio::test]
async fn imageless_allowed_policy_verifies_without_reward() {
    let extraction = Box::new(MockExtractionClient::new().with_delay(Duration::from_millis(1)));
    let ledger = Arc::new(MockLedger::new(Duration::from_millis(1)));
    let app = app_router(state_with(
        ActionStore::in_memory(),
        extraction,
        ledger,
        VerifierConfig::default().with_allow_imageless(true),
    ));

    let action_id = submit(
        &app,
        json!({
            "owner_id": "user-1",
            "category": "energy",
            "data": { "kwh": 120.0 }
        }),
    )
    .await;

    let (status, payload) = request(
        &app,
        "POST",
        &format!("/eco/actions/{action_id}/verify"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["verified"], true);
    assert!((payload["confidence"].as_f64().unwrap() - 0.6).abs() < 1e-9);
    assert_eq!(payload["tokens_issued"].as_u64(), Some(0));
    assert!(payload["estimated_co2_kg"].is_null());
}

#[tokio::test]
async fn extraction_failure_rejects_with_degraded_confidence() {
    let ledger = Arc::new(MockLedger::new(Duration::from_millis(1)));
    let app = app_router(state_with(
        ActionStore::in_memory(),
        Box::new(FailingExtractionClient::default()),
        ledger,
        VerifierConfig::default(),
    ));

    let action_id = submit(&app, energy_submission(450.0)).await;
    let (status, payload) = request(
        &app,
        "POST",
        &format!("/eco/actions/{action_id}/verify"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["verified"], false);
    assert!((payload["confidence"].as_f64().unwrap() - 0.35).abs() < 1e-9);
    assert!(payload["analysis"].as_str().unwrap().contains("extraction failed"));
}

#[tokio::test]
async fn variance_mismatch_rejects_with_explanation() {
    let extraction = Box::new(
        MockExtractionClient::new()
            .with_delay(Duration::from_millis(1))
            .with_bill_text(bill_text(400.0, 75.0)),
    );
    let ledger = Arc::new(MockLedger::new(Duration::from_millis(1)));
    let app = app_router(state_with(
        ActionStore::in_memory(),
        extraction,
        ledger,
        VerifierConfig::default(),
    ));

    let action_id = submit(&app, energy_submission(500.0)).await;
    let (status, payload) = request(
        &app,
        "POST",
        &format!("/eco/actions/{action_id}/verify"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["verified"], false);
    let analysis = payload["analysis"].as_str().unwrap();
    assert!(analysis.contains("variance 25.0%"), "analysis: {analysis}");
    assert!(analysis.contains("500.0 kWh"));
    assert!(analysis.contains("400.0 kWh"));
    assert_eq!(payload["tokens_issued"].as_u64(), Some(0));
}

#[tokio::test]
async fn mint_failure_leaves_action_verified_but_unpaid_and_retryable() {
    let store = ActionStore::in_memory();

    let failing_app = app_router(state_with(
        store.clone(),
        Box::new(
            MockExtractionClient::new()
                .with_delay(Duration::from_millis(1))
                .with_bill_text(SAMPLE_BILL_450),
        ),
        Arc::new(FailingLedger),
        VerifierConfig::default(),
    ));

    let action_id = submit(&failing_app, energy_submission(450.0)).await;
    let (status, payload) = request(
        &failing_app,
        "POST",
        &format!("/eco/actions/{action_id}/verify"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["verified"], true);
    assert_eq!(payload["tokens_issued"].as_u64(), Some(0));
    assert_eq!(payload["error_code"], "MINT_FAILED");
    assert!(payload["error"].as_str().unwrap().contains("simulated RPC failure"));
    assert!(payload["tx_hash"].is_null());

    // Same store, working ledger: retry completes the payout without
    // re-running verification.
    let healthy_app = app_router(state_with(
        store.clone(),
        Box::new(MockExtractionClient::new().with_delay(Duration::from_millis(1))),
        Arc::new(MockLedger::new(Duration::from_millis(1))),
        VerifierConfig::default(),
    ));

    let (status, payload) = request(
        &healthy_app,
        "POST",
        &format!("/eco/actions/{action_id}/retry-mint"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["tokens_issued"].as_u64(), Some(187));
    assert!(payload["tx_hash"].as_str().unwrap().starts_with("0x"));

    // A second retry is refused: the reward is already paid.
    let (status, payload) = request(
        &healthy_app,
        "POST",
        &format!("/eco/actions/{action_id}/retry-mint"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(payload["error_code"], "ALREADY_MINTED");
}

#[tokio::test]
async fn verifying_a_terminal_action_conflicts() {
    let app = default_app();
    let action_id = submit(&app, energy_submission(450.0)).await;

    let (first, _) = request(
        &app,
        "POST",
        &format!("/eco/actions/{action_id}/verify"),
        None,
    )
    .await;
    assert_eq!(first, StatusCode::OK);

    let (second, payload) = request(
        &app,
        "POST",
        &format!("/eco/actions/{action_id}/verify"),
        None,
    )
    .await;
    assert_eq!(second, StatusCode::CONFLICT);
    assert_eq!(payload["error_code"], "ACTION_ALREADY_FINAL");
}

#[tokio::test]
async fn unknown_category_is_a_client_error() {
    let app = default_app();
    let (status, payload) = request(
        &app,
        "POST",
        "/eco/actions",
        Some(json!({
            "owner_id": "user-1",
            "category": "geothermal",
            "data": {}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(payload["error_code"], "INVALID_SUBMISSION");
}

#[tokio::test]
async fn balance_reflects_minted_reward() {
    let app = default_app();
    let action_id = submit(&app, energy_submission(450.0)).await;
    let (_, verify) = request(
        &app,
        "POST",
        &format!("/eco/actions/{action_id}/verify"),
        None,
    )
    .await;
    assert_eq!(verify["tokens_issued"].as_u64(), Some(187));

    let (status, balance) = request(&app, "GET", "/eco/users/user-1/balance", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(balance["total_tokens"].as_i64(), Some(187));
    assert!((balance["total_co2_saved_kg"].as_f64().unwrap() - 187.2).abs() < 1e-6);
}

#[tokio::test]
async fn solar_category_applies_multiplier() {
    let app = default_app();
    let action_id = submit(
        &app,
        json!({
            "owner_id": "user-1",
            "category": "solar",
            "data": { "kwh": 450.0, "energy_type": "electricity_grid" },
            "image_ref": "bills/jan.png",
            "payout_address": "0x00000000000000000000000000000000000000aa"
        }),
    )
    .await;

    let (_, payload) = request(
        &app,
        "POST",
        &format!("/eco/actions/{action_id}/verify"),
        None,
    )
    .await;
    assert_eq!(payload["verified"], true, "payload: {payload}");
    // floor(187.2) = 187 base tokens, floor(187 * 1.5) = 280
    assert_eq!(payload["tokens_issued"].as_u64(), Some(280));
}

#[tokio::test]
async fn batch_verify_covers_all_requested_actions() {
    let app = default_app();
    let first = submit(&app, energy_submission(450.0)).await;
    let second = submit(&app, energy_submission(450.0)).await;
    let third = submit(
        &app,
        json!({
            "owner_id": "user-2",
            "category": "energy",
            "data": { "kwh": 450.0 }
        }),
    )
    .await;
    let unknown = uuid::Uuid::new_v4().to_string();

    let (status, payload) = request(
        &app,
        "POST",
        "/eco/actions/verify-batch",
        Some(json!({ "action_ids": [first, second, third, unknown] })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let results = payload["results"].as_array().unwrap();
    assert_eq!(results.len(), 4);
    assert_eq!(results[0]["result"]["verified"], true);
    assert_eq!(results[1]["result"]["verified"], true);
    // No image was attached to the third action.
    assert_eq!(results[2]["result"]["verified"], false);
    assert_eq!(results[3]["error_code"], "ACTION_NOT_FOUND");
}

#[tokio::test]
async fn estimate_endpoint_returns_impact_savings_and_recommendations() {
    let app = default_app();
    let (status, payload) = request(
        &app,
        "POST",
        "/eco/estimate",
        Some(json!({ "kwh": 1200.0 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let co2 = payload["estimate"]["co2_kg"].as_f64().unwrap();
    assert!((co2 - 1200.0 * 0.416).abs() < 1e-6);
    assert_eq!(
        payload["estimate"]["breakdown"]["energy_type"].as_str(),
        Some("electricity_grid")
    );
    assert!(payload["savings_potential"]["led_lighting"]["kwh_saved"].as_f64().unwrap() > 0.0);
    assert_eq!(payload["recommendations"].as_array().unwrap().len(), 3);

    let (status, payload) = request(
        &app,
        "POST",
        "/eco/estimate",
        Some(json!({ "kwh": -5.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(payload["error_code"], "INVALID_SUBMISSION");
}

#[tokio::test]
async fn profile_totals_follow_minted_rewards() {
    let store = ActionStore::in_memory();
    let app = app_router(state_with(
        store.clone(),
        Box::new(MockExtractionClient::new().with_delay(Duration::from_millis(1))),
        Arc::new(MockLedger::new(Duration::from_millis(1))),
        VerifierConfig::default(),
    ));

    let action_id = submit(&app, energy_submission(450.0)).await;
    let (_, payload) = request(
        &app,
        "POST",
        &format!("/eco/actions/{action_id}/verify"),
        None,
    )
    .await;
    assert_eq!(payload["tokens_issued"].as_u64(), Some(187));

    // The projector task runs asynchronously; poll briefly.
    let mut totals = None;
    for _ in 0..50 {
        if let Some(profile) = store.get_profile("user-1").unwrap() {
            if profile.total_tokens > 0 {
                totals = Some(profile);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let profile = totals.expect("profile totals projected");
    assert_eq!(profile.total_tokens, 187);
    assert!((profile.total_co2_saved_kg - 187.2).abs() < 1e-6);
}
