//! HTTP intake API for the ecoproof pipeline.
//!
//! Routes accept action submissions, run the verification orchestrator,
//! and complete reward issuance against the ledger and record store.
//! Business rejections (failed verification, failed mint) are successful
//! responses carrying `verified`/`tokens_issued`; HTTP error statuses are
//! reserved for malformed input, unknown resources, and infrastructure
//! failures.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::future;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use ecoproof_common::{
    Action, ActionCategory, ActionStatus, EmissionFactorTable, ImpactEstimate, MultiplierTable,
    Profile, Recommendation, SavingsPotential, SubmittedData, Transaction, TransactionKind,
    TransactionMetadata, UserBalance, VerificationOutcome,
};
use ecoproof_extraction::{build_extraction_client, AnalysisClient, ExtractionConfig, ExtractionMode};
use ecoproof_ledger::{build_ledger, LedgerConfig, LedgerMode, TokenLedger};
use ecoproof_store::{ActionStore, ActionUpdate, StoreError};
use ecoproof_verifier::{
    calculate_reward, ImpactEstimator, ImpactRequest, VerificationOrchestrator, VerifierConfig,
    VerifyActionRequest, BATCH_CONCURRENCY, BATCH_DELAY,
};

const BIND_ADDR_ENV: &str = "ECOPROOF_BIND_ADDR";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const STORE_MODE_ENV: &str = "ECOPROOF_STORE_MODE";
const STORE_PATH_ENV: &str = "ECOPROOF_STORE_PATH";
const DEFAULT_STORE_PATH: &str = "data/ecoproof.db";
const EXTRACTION_MODE_ENV: &str = "ECOPROOF_EXTRACTION_MODE";
const EXTRACTION_ENDPOINT_ENV: &str = "ECOPROOF_EXTRACTION_ENDPOINT";
const ANALYSIS_ENDPOINT_ENV: &str = "ECOPROOF_ANALYSIS_ENDPOINT";
const LEDGER_MODE_ENV: &str = "ECOPROOF_LEDGER_MODE";
const LEDGER_RPC_URL_ENV: &str = "ECOPROOF_LEDGER_RPC_URL";
const LEDGER_CONTRACT_ENV: &str = "ECOPROOF_LEDGER_CONTRACT_ADDRESS";
const LEDGER_PRIVATE_KEY_ENV: &str = "ECOPROOF_LEDGER_PRIVATE_KEY";
const LEDGER_CHAIN_ID_ENV: &str = "ECOPROOF_LEDGER_CHAIN_ID";
const VERIFIED_THRESHOLD_ENV: &str = "ECOPROOF_VERIFIED_THRESHOLD";
const ALLOW_IMAGELESS_ENV: &str = "ECOPROOF_ALLOW_IMAGELESS";

const ML_CALL_TIMEOUT: Duration = Duration::from_secs(30);

const CODE_INVALID_SUBMISSION: &str = "INVALID_SUBMISSION";
const CODE_ACTION_NOT_FOUND: &str = "ACTION_NOT_FOUND";
const CODE_ACTION_ALREADY_FINAL: &str = "ACTION_ALREADY_FINAL";
const CODE_ALREADY_MINTED: &str = "ALREADY_MINTED";
const CODE_NOT_VERIFIED: &str = "NOT_VERIFIED";
const CODE_STORE_ERROR: &str = "STORE_ERROR";
const CODE_MINT_FAILED: &str = "MINT_FAILED";
const CODE_MINT_ALREADY_CLAIMED: &str = "MINT_ALREADY_CLAIMED";
const CODE_NO_PAYOUT_ADDRESS: &str = "NO_PAYOUT_ADDRESS";

/// Reward issued notification, consumed by the balance projector so the
/// ledger path stays decoupled from the profile store.
#[derive(Debug, Clone)]
pub struct RewardEvent {
    pub owner_id: String,
    pub tokens: u64,
    pub co2_saved_kg: f64,
}

#[derive(Clone)]
pub struct AppState {
    store: ActionStore,
    orchestrator: Arc<VerificationOrchestrator>,
    estimator: ImpactEstimator,
    ledger: Arc<dyn TokenLedger>,
    multipliers: MultiplierTable,
    events: mpsc::Sender<RewardEvent>,
}

impl AppState {
    pub fn with_components(
        store: ActionStore,
        orchestrator: Arc<VerificationOrchestrator>,
        estimator: ImpactEstimator,
        ledger: Arc<dyn TokenLedger>,
        multipliers: MultiplierTable,
    ) -> (Self, mpsc::Receiver<RewardEvent>) {
        let (events, receiver) = mpsc::channel(64);
        (
            Self {
                store,
                orchestrator,
                estimator,
                ledger,
                multipliers,
                events,
            },
            receiver,
        )
    }

    /// Assemble the full pipeline from environment variables. Incomplete
    /// EVM configuration is an error rather than a silent mock fallback.
    pub fn from_env() -> anyhow::Result<(Self, mpsc::Receiver<RewardEvent>)> {
        let store = match env::var(STORE_MODE_ENV).as_deref() {
            Ok("memory") => ActionStore::in_memory(),
            _ => {
                let path =
                    env::var(STORE_PATH_ENV).unwrap_or_else(|_| DEFAULT_STORE_PATH.to_string());
                ActionStore::persistent(&path)
                    .map_err(|e| anyhow::anyhow!("failed to open store at {path}: {e}"))?
            }
        };

        let mut extraction_config = match env::var(EXTRACTION_MODE_ENV).as_deref() {
            Ok("mock") => ExtractionConfig::mock(),
            _ => ExtractionConfig::default(),
        };
        if let Ok(endpoint) = env::var(EXTRACTION_ENDPOINT_ENV) {
            extraction_config = extraction_config.with_endpoint(endpoint);
        }
        extraction_config = extraction_config.with_timeout(ML_CALL_TIMEOUT);
        if extraction_config.mode == ExtractionMode::Http && extraction_config.endpoint.is_none() {
            warn!(
                "{} is not set; extraction will degrade to the low-confidence fallback on every call",
                EXTRACTION_ENDPOINT_ENV
            );
        }
        let extraction = build_extraction_client(&extraction_config)
            .map_err(|e| anyhow::anyhow!("failed to build extraction client: {e}"))?;

        let ledger_mode = match env::var(LEDGER_MODE_ENV).as_deref() {
            Ok("evm") => LedgerMode::Evm,
            _ => LedgerMode::Mock,
        };
        let ledger_config = match ledger_mode {
            LedgerMode::Mock => {
                warn!("ledger running in mock mode; no real tokens will be minted");
                LedgerConfig::default()
            }
            LedgerMode::Evm => {
                let mut missing = Vec::new();
                let rpc_url = env::var(LEDGER_RPC_URL_ENV).ok().filter(|v| !v.trim().is_empty());
                if rpc_url.is_none() {
                    missing.push(LEDGER_RPC_URL_ENV);
                }
                let contract = env::var(LEDGER_CONTRACT_ENV).ok().filter(|v| !v.trim().is_empty());
                if contract.is_none() {
                    missing.push(LEDGER_CONTRACT_ENV);
                }
                let key = env::var(LEDGER_PRIVATE_KEY_ENV).ok().filter(|v| !v.trim().is_empty());
                if key.is_none() {
                    missing.push(LEDGER_PRIVATE_KEY_ENV);
                }
                if !missing.is_empty() {
                    anyhow::bail!("evm ledger configuration is incomplete: {}", missing.join(", "));
                }
                let chain_id = env::var(LEDGER_CHAIN_ID_ENV)
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                LedgerConfig::evm(
                    rpc_url.unwrap_or_default(),
                    contract.unwrap_or_default(),
                    key.unwrap_or_default(),
                )
                .with_chain_id(chain_id)
            }
        };
        let ledger =
            build_ledger(&ledger_config).map_err(|e| anyhow::anyhow!("failed to build ledger: {e}"))?;

        let mut verifier_config = VerifierConfig::default();
        if let Some(threshold) = env::var(VERIFIED_THRESHOLD_ENV)
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
        {
            verifier_config = verifier_config.with_verified_threshold(threshold);
        }
        if let Ok(value) = env::var(ALLOW_IMAGELESS_ENV) {
            let allow = matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
            verifier_config = verifier_config.with_allow_imageless(allow);
        }

        let estimator = ImpactEstimator::new(EmissionFactorTable::default());
        let mut orchestrator =
            VerificationOrchestrator::new(verifier_config, extraction, estimator.clone());
        if let Ok(endpoint) = env::var(ANALYSIS_ENDPOINT_ENV) {
            let client = AnalysisClient::new(endpoint, ML_CALL_TIMEOUT)
                .map_err(|e| anyhow::anyhow!("failed to build analysis client: {e}"))?;
            orchestrator = orchestrator.with_analysis(client);
        }

        Ok(Self::with_components(
            store,
            Arc::new(orchestrator),
            estimator,
            ledger,
            MultiplierTable::default(),
        ))
    }

    pub fn store(&self) -> &ActionStore {
        &self.store
    }
}

/// Consume reward events and fold them into profile totals.
pub fn spawn_balance_projector(
    store: ActionStore,
    mut events: mpsc::Receiver<RewardEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Err(err) =
                store.add_profile_totals(&event.owner_id, event.tokens as i64, event.co2_saved_kg)
            {
                warn!(owner_id = %event.owner_id, error = %err, "failed to project reward into profile totals");
            }
        }
    })
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    fn action_not_found(id: Uuid) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            CODE_ACTION_NOT_FOUND,
            format!("action {id} not found"),
        )
    }

    fn store(err: StoreError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, CODE_STORE_ERROR, err.to_string())
    }
}

#[derive(serde::Serialize)]
struct ErrorResponse {
    error: String,
    error_code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            error_code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/eco/actions", post(submit_action))
        .route("/eco/actions/verify-batch", post(verify_batch))
        .route("/eco/actions/:id", get(get_action))
        .route("/eco/actions/:id/verify", post(verify_action))
        .route("/eco/actions/:id/retry-mint", post(retry_mint))
        .route("/eco/users/:owner_id/actions", get(list_owner_actions))
        .route("/eco/users/:owner_id/balance", get(owner_balance))
        .route("/eco/estimate", post(estimate))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: AppState, addr: &str) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "ecoproof backend listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

pub fn bind_addr_from_env() -> String {
    env::var(BIND_ADDR_ENV).unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "ecoproof-backend"
    }))
}

#[derive(serde::Deserialize)]
struct SubmitActionRequest {
    owner_id: String,
    category: String,
    #[serde(default)]
    data: SubmittedData,
    #[serde(default)]
    image_ref: Option<String>,
    #[serde(default)]
    payout_address: Option<String>,
}

#[derive(serde::Serialize)]
struct SubmitActionResponse {
    action_id: Uuid,
}

async fn submit_action(
    State(state): State<AppState>,
    Json(req): Json<SubmitActionRequest>,
) -> Result<(StatusCode, Json<SubmitActionResponse>), ApiError> {
    if req.owner_id.trim().is_empty() {
        return Err(ApiError::bad_request(
            CODE_INVALID_SUBMISSION,
            "owner_id must not be empty",
        ));
    }
    let category = ActionCategory::parse(&req.category).ok_or_else(|| {
        ApiError::bad_request(
            CODE_INVALID_SUBMISSION,
            format!("unknown category '{}'", req.category),
        )
    })?;
    if let Some(kwh) = req.data.kwh {
        if !kwh.is_finite() || kwh < 0.0 {
            return Err(ApiError::bad_request(
                CODE_INVALID_SUBMISSION,
                "kwh must be a non-negative number",
            ));
        }
    }

    let action = Action::new(req.owner_id.clone(), category, req.data, req.image_ref);
    state.store.create_action(&action).map_err(ApiError::store)?;

    if let Some(payout_address) = req.payout_address.filter(|a| !a.trim().is_empty()) {
        let profile = match state.store.get_profile(&req.owner_id).map_err(ApiError::store)? {
            Some(mut existing) => {
                existing.payout_address = payout_address;
                existing
            }
            None => Profile {
                owner_id: req.owner_id.clone(),
                payout_address,
                total_tokens: 0,
                total_co2_saved_kg: 0.0,
            },
        };
        state.store.upsert_profile(&profile).map_err(ApiError::store)?;
    }

    info!(action_id = %action.id, owner_id = %action.owner_id, category = %category, "action submitted");
    Ok((
        StatusCode::OK,
        Json(SubmitActionResponse {
            action_id: action.id,
        }),
    ))
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct VerifyActionResponse {
    pub action_id: Uuid,
    pub verified: bool,
    pub confidence: f64,
    pub analysis: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_co2_kg: Option<f64>,
    pub tokens_issued: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

impl VerifyActionResponse {
    fn rejected(action_id: Uuid, outcome: &VerificationOutcome) -> Self {
        Self {
            action_id,
            verified: false,
            confidence: outcome.confidence,
            analysis: outcome.analysis.clone(),
            estimated_co2_kg: None,
            tokens_issued: 0,
            tx_hash: None,
            error: None,
            error_code: None,
        }
    }
}

struct MintOutcome {
    tokens: u64,
    tx_hash: Option<String>,
    error: Option<(&'static str, String)>,
}

async fn verify_action(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<VerifyActionResponse>, ApiError> {
    run_verification(&state, id).await.map(Json)
}

/// Full pipeline for one action: orchestrate verification, project the
/// outcome into the record, and complete reward issuance. Every return
/// leaves the action in a terminal state.
async fn run_verification(state: &AppState, id: Uuid) -> Result<VerifyActionResponse, ApiError> {
    let action = state
        .store
        .get_action(&id)
        .map_err(ApiError::store)?
        .ok_or_else(|| ApiError::action_not_found(id))?;

    if action.status.is_terminal() {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            CODE_ACTION_ALREADY_FINAL,
            format!("action {id} is already {}", status_name(action.status)),
        ));
    }

    let request = VerifyActionRequest::from(&action);
    let outcome = state.orchestrator.verify_action(&request).await;

    if !outcome.verified {
        state
            .store
            .update_action(
                &id,
                ActionUpdate::terminal(ActionStatus::Rejected, outcome.confidence, outcome.analysis.clone()),
            )
            .map_err(ApiError::store)?;
        info!(action_id = %id, confidence = outcome.confidence, "action rejected");
        return Ok(VerifyActionResponse::rejected(id, &outcome));
    }

    let co2_kg = outcome.impact.as_ref().map(|i| i.co2_kg).filter(|c| *c > 0.0);

    // Verified without a positive impact figure (e.g. imageless policy):
    // nothing to mint, terminal update only.
    let Some(co2_kg) = co2_kg else {
        state
            .store
            .update_action(
                &id,
                ActionUpdate::terminal(ActionStatus::Verified, outcome.confidence, outcome.analysis.clone()),
            )
            .map_err(ApiError::store)?;
        return Ok(VerifyActionResponse {
            action_id: id,
            verified: true,
            confidence: outcome.confidence,
            analysis: outcome.analysis.clone(),
            estimated_co2_kg: None,
            tokens_issued: 0,
            tx_hash: None,
            error: None,
            error_code: None,
        });
    };

    let mint = issue_reward(
        state,
        &action,
        outcome.confidence,
        co2_kg,
        &outcome.analysis,
    )
    .await?;

    Ok(VerifyActionResponse {
        action_id: id,
        verified: true,
        confidence: outcome.confidence,
        analysis: outcome.analysis.clone(),
        estimated_co2_kg: Some(co2_kg),
        tokens_issued: mint.tokens,
        tx_hash: mint.tx_hash,
        error: mint.error.as_ref().map(|(_, message)| message.clone()),
        error_code: mint.error.map(|(code, _)| code),
    })
}

/// Claim, mint, record, and project the reward for a verified action. A
/// failed mint releases the claim and records the verified-but-unpaid
/// state, which `retry-mint` can complete later.
async fn issue_reward(
    state: &AppState,
    action: &Action,
    confidence: f64,
    co2_kg: f64,
    analysis: &str,
) -> Result<MintOutcome, ApiError> {
    let id = action.id;
    let tokens = calculate_reward(co2_kg, action.category, &state.multipliers);

    let record_unpaid = |error: (&'static str, String)| -> Result<MintOutcome, ApiError> {
        state
            .store
            .update_action(
                &id,
                ActionUpdate {
                    status: ActionStatus::Verified,
                    confidence,
                    analysis_note: analysis.to_string(),
                    estimated_co2_kg: Some(co2_kg),
                    tokens_issued: Some(0),
                    tx_reference: None,
                },
            )
            .map_err(ApiError::store)?;
        Ok(MintOutcome {
            tokens: 0,
            tx_hash: None,
            error: Some(error),
        })
    };

    match state.store.claim_mint(&id) {
        Ok(()) => {}
        Err(StoreError::MintAlreadyClaimed(_)) => {
            return record_unpaid((
                CODE_MINT_ALREADY_CLAIMED,
                "a mint for this action is already in flight or completed".to_string(),
            ));
        }
        Err(err) => return Err(ApiError::store(err)),
    }

    let payout_address = state
        .store
        .get_profile(&action.owner_id)
        .map_err(ApiError::store)?
        .map(|p| p.payout_address)
        .filter(|a| !a.trim().is_empty());
    let Some(payout_address) = payout_address else {
        state.store.release_mint(&id).map_err(ApiError::store)?;
        return record_unpaid((
            CODE_NO_PAYOUT_ADDRESS,
            "no payout address on the owner's profile".to_string(),
        ));
    };

    let metadata = TransactionMetadata {
        action_id: id,
        confidence,
        co2_saved_kg: co2_kg,
    };

    let receipt = match state.ledger.mint(&payout_address, tokens, &metadata).await {
        Ok(receipt) if receipt.success => receipt,
        Ok(receipt) => {
            warn!(action_id = %id, tx_hash = %receipt.tx_hash, "mint transaction reverted");
            state.store.release_mint(&id).map_err(ApiError::store)?;
            return record_unpaid((CODE_MINT_FAILED, "mint transaction reverted".to_string()));
        }
        Err(err) => {
            warn!(action_id = %id, error = %err, "mint failed, action left verified-but-unpaid");
            state.store.release_mint(&id).map_err(ApiError::store)?;
            return record_unpaid((CODE_MINT_FAILED, err.to_string()));
        }
    };

    let transaction = Transaction {
        id: Uuid::new_v4(),
        owner_id: action.owner_id.clone(),
        kind: TransactionKind::Mint,
        amount: tokens,
        chain_tx_hash: receipt.tx_hash.clone(),
        created_at: Utc::now(),
        metadata,
    };
    state
        .store
        .record_transaction(&transaction)
        .map_err(ApiError::store)?;

    state
        .store
        .update_action(
            &id,
            ActionUpdate {
                status: ActionStatus::Verified,
                confidence,
                analysis_note: analysis.to_string(),
                estimated_co2_kg: Some(co2_kg),
                tokens_issued: Some(tokens),
                tx_reference: Some(receipt.tx_hash.clone()),
            },
        )
        .map_err(ApiError::store)?;

    if state
        .events
        .send(RewardEvent {
            owner_id: action.owner_id.clone(),
            tokens,
            co2_saved_kg: co2_kg,
        })
        .await
        .is_err()
    {
        warn!(action_id = %id, "reward event channel closed; profile totals not projected");
    }

    info!(action_id = %id, tokens, tx_hash = %receipt.tx_hash, "reward issued");
    Ok(MintOutcome {
        tokens,
        tx_hash: Some(receipt.tx_hash),
        error: None,
    })
}

/// Retry reward issuance for a verified-but-unpaid action without
/// re-running verification.
async fn retry_mint(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<VerifyActionResponse>, ApiError> {
    let action = state
        .store
        .get_action(&id)
        .map_err(ApiError::store)?
        .ok_or_else(|| ApiError::action_not_found(id))?;

    if action.status != ActionStatus::Verified {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            CODE_NOT_VERIFIED,
            format!("action {id} is {}, not verified", status_name(action.status)),
        ));
    }
    if action.tokens_issued > 0 {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            CODE_ALREADY_MINTED,
            format!("action {id} already has {} tokens issued", action.tokens_issued),
        ));
    }
    let Some(co2_kg) = action.estimated_co2_kg.filter(|c| *c > 0.0) else {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            CODE_NOT_VERIFIED,
            format!("action {id} has no positive impact figure to reward"),
        ));
    };

    let mint = issue_reward(
        &state,
        &action,
        action.confidence,
        co2_kg,
        &action.analysis_note,
    )
    .await?;

    Ok(Json(VerifyActionResponse {
        action_id: id,
        verified: true,
        confidence: action.confidence,
        analysis: action.analysis_note.clone(),
        estimated_co2_kg: Some(co2_kg),
        tokens_issued: mint.tokens,
        tx_hash: mint.tx_hash,
        error: mint.error.as_ref().map(|(_, message)| message.clone()),
        error_code: mint.error.map(|(code, _)| code),
    }))
}

#[derive(serde::Deserialize)]
struct VerifyBatchRequest {
    action_ids: Vec<Uuid>,
}

#[derive(serde::Serialize)]
struct BatchEntry {
    action_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<VerifyActionResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'static str>,
}

#[derive(serde::Serialize)]
struct VerifyBatchResponse {
    results: Vec<BatchEntry>,
}

/// Verify many independent actions with bounded concurrency and a short
/// pause between waves, as backpressure on the external services.
async fn verify_batch(
    State(state): State<AppState>,
    Json(req): Json<VerifyBatchRequest>,
) -> Result<Json<VerifyBatchResponse>, ApiError> {
    let mut results = Vec::with_capacity(req.action_ids.len());

    for (wave, chunk) in req.action_ids.chunks(BATCH_CONCURRENCY).enumerate() {
        if wave > 0 {
            tokio::time::sleep(BATCH_DELAY).await;
        }
        let outcomes =
            future::join_all(chunk.iter().map(|id| run_verification(&state, *id))).await;
        for (id, outcome) in chunk.iter().zip(outcomes) {
            results.push(match outcome {
                Ok(result) => BatchEntry {
                    action_id: *id,
                    result: Some(result),
                    error: None,
                    error_code: None,
                },
                Err(err) => BatchEntry {
                    action_id: *id,
                    result: None,
                    error: Some(err.message),
                    error_code: Some(err.code),
                },
            });
        }
    }

    Ok(Json(VerifyBatchResponse { results }))
}

async fn get_action(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<Action>, ApiError> {
    state
        .store
        .get_action(&id)
        .map_err(ApiError::store)?
        .map(Json)
        .ok_or_else(|| ApiError::action_not_found(id))
}

async fn list_owner_actions(
    State(state): State<AppState>,
    AxumPath(owner_id): AxumPath<String>,
) -> Result<Json<Vec<Action>>, ApiError> {
    state
        .store
        .list_actions_by_owner(&owner_id)
        .map(Json)
        .map_err(ApiError::store)
}

async fn owner_balance(
    State(state): State<AppState>,
    AxumPath(owner_id): AxumPath<String>,
) -> Result<Json<UserBalance>, ApiError> {
    state
        .store
        .balance_of(&owner_id)
        .map(Json)
        .map_err(ApiError::store)
}

#[derive(serde::Deserialize)]
struct EstimateRequest {
    kwh: f64,
    #[serde(default)]
    energy_type: Option<String>,
    #[serde(default)]
    household_size: Option<u32>,
    #[serde(default)]
    region: Option<String>,
}

#[derive(serde::Serialize)]
struct EstimateResponse {
    estimate: ImpactEstimate,
    savings_potential: SavingsPotential,
    recommendations: Vec<Recommendation>,
}

async fn estimate(
    State(state): State<AppState>,
    Json(req): Json<EstimateRequest>,
) -> Result<Json<EstimateResponse>, ApiError> {
    if !req.kwh.is_finite() || req.kwh < 0.0 {
        return Err(ApiError::bad_request(
            CODE_INVALID_SUBMISSION,
            "kwh must be a non-negative number",
        ));
    }

    let request = ImpactRequest {
        kwh: req.kwh,
        energy_type: req
            .energy_type
            .unwrap_or_else(|| "electricity_grid".to_string()),
        household_size: req.household_size,
        region: req.region,
    };
    let estimate = state.estimator.estimate(&request).await;
    let savings_potential = state.estimator.savings_potential(req.kwh);
    let recommendations = state.estimator.recommendations(req.kwh);

    Ok(Json(EstimateResponse {
        estimate,
        savings_potential,
        recommendations,
    }))
}

fn status_name(status: ActionStatus) -> &'static str {
    match status {
        ActionStatus::Pending => "pending",
        ActionStatus::Verified => "verified",
        ActionStatus::Rejected => "rejected",
    }
}
