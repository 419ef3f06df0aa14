//! Action record store.
//!
//! Persists the action lifecycle (pending → verified/rejected), the
//! transaction ledger rows, the per-action mint claim that enforces
//! at-most-once issuance, and the narrow profile records used to resolve
//! payout addresses. Two backends share one API: an in-memory map store for
//! tests and a sled-backed persistent store for deployments.
//!
//! Concurrent updates to the same action are not expected (one verification
//! attempt per action); if they do happen the store is last-write-wins and
//! never corrupts serialized state.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use ecoproof_common::{
    Action, ActionStatus, Profile, Transaction, TransactionKind, UserBalance,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("action {0} not found")]
    ActionNotFound(Uuid),
    #[error("mint already claimed for action {0}")]
    MintAlreadyClaimed(Uuid),
}

/// Terminal update applied exactly once per action under normal operation.
/// Status, confidence, and analysis always apply; the reward fields only
/// when present.
#[derive(Debug, Clone)]
pub struct ActionUpdate {
    pub status: ActionStatus,
    pub confidence: f64,
    pub analysis_note: String,
    pub estimated_co2_kg: Option<f64>,
    pub tokens_issued: Option<u64>,
    pub tx_reference: Option<String>,
}

impl ActionUpdate {
    pub fn terminal(status: ActionStatus, confidence: f64, analysis_note: impl Into<String>) -> Self {
        Self {
            status,
            confidence,
            analysis_note: analysis_note.into(),
            estimated_co2_kg: None,
            tokens_issued: None,
            tx_reference: None,
        }
    }

    fn apply(self, action: &mut Action) {
        action.status = self.status;
        action.confidence = self.confidence;
        action.analysis_note = self.analysis_note;
        if self.estimated_co2_kg.is_some() {
            action.estimated_co2_kg = self.estimated_co2_kg;
        }
        if let Some(tokens) = self.tokens_issued {
            action.tokens_issued = tokens;
        }
        if self.tx_reference.is_some() {
            action.tx_reference = self.tx_reference;
        }
        action.updated_at = Utc::now();
    }
}

#[derive(Clone)]
pub struct ActionStore {
    backend: Arc<StoreBackend>,
}

enum StoreBackend {
    InMemory(Memory),
    Persistent(Trees),
}

#[derive(Default)]
struct Memory {
    actions: Mutex<HashMap<Uuid, Action>>,
    transactions: Mutex<Vec<Transaction>>,
    claims: Mutex<HashSet<Uuid>>,
    profiles: Mutex<HashMap<String, Profile>>,
}

struct Trees {
    actions: sled::Tree,
    transactions: sled::Tree,
    claims: sled::Tree,
    profiles: sled::Tree,
    _db: sled::Db,
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn backend_err(err: sled::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl ActionStore {
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(StoreBackend::InMemory(Memory::default())),
        }
    }

    pub fn persistent(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref()).map_err(backend_err)?;
        let trees = Trees {
            actions: db.open_tree("actions").map_err(backend_err)?,
            transactions: db.open_tree("transactions").map_err(backend_err)?,
            claims: db.open_tree("mint_claims").map_err(backend_err)?,
            profiles: db.open_tree("profiles").map_err(backend_err)?,
            _db: db,
        };
        Ok(Self {
            backend: Arc::new(StoreBackend::Persistent(trees)),
        })
    }

    pub fn create_action(&self, action: &Action) -> Result<(), StoreError> {
        match &*self.backend {
            StoreBackend::InMemory(mem) => {
                mem.actions
                    .lock()
                    .expect("action store poisoned")
                    .insert(action.id, action.clone());
                Ok(())
            }
            StoreBackend::Persistent(trees) => {
                trees
                    .actions
                    .insert(action.id.as_bytes(), encode(action)?)
                    .map_err(backend_err)?;
                Ok(())
            }
        }
    }

    pub fn get_action(&self, id: &Uuid) -> Result<Option<Action>, StoreError> {
        match &*self.backend {
            StoreBackend::InMemory(mem) => Ok(mem
                .actions
                .lock()
                .expect("action store poisoned")
                .get(id)
                .cloned()),
            StoreBackend::Persistent(trees) => trees
                .actions
                .get(id.as_bytes())
                .map_err(backend_err)?
                .map(|bytes| decode(&bytes))
                .transpose(),
        }
    }

    /// Apply the terminal update. Returns the updated record.
    pub fn update_action(&self, id: &Uuid, update: ActionUpdate) -> Result<Action, StoreError> {
        match &*self.backend {
            StoreBackend::InMemory(mem) => {
                let mut actions = mem.actions.lock().expect("action store poisoned");
                let action = actions.get_mut(id).ok_or(StoreError::ActionNotFound(*id))?;
                update.apply(action);
                Ok(action.clone())
            }
            StoreBackend::Persistent(trees) => {
                let bytes = trees
                    .actions
                    .get(id.as_bytes())
                    .map_err(backend_err)?
                    .ok_or(StoreError::ActionNotFound(*id))?;
                let mut action: Action = decode(&bytes)?;
                update.apply(&mut action);
                trees
                    .actions
                    .insert(id.as_bytes(), encode(&action)?)
                    .map_err(backend_err)?;
                Ok(action)
            }
        }
    }

    pub fn list_actions_by_owner(&self, owner_id: &str) -> Result<Vec<Action>, StoreError> {
        let mut actions = match &*self.backend {
            StoreBackend::InMemory(mem) => mem
                .actions
                .lock()
                .expect("action store poisoned")
                .values()
                .filter(|a| a.owner_id == owner_id)
                .cloned()
                .collect::<Vec<_>>(),
            StoreBackend::Persistent(trees) => {
                let mut out = Vec::new();
                for item in trees.actions.iter() {
                    let (_, bytes) = item.map_err(backend_err)?;
                    let action: Action = decode(&bytes)?;
                    if action.owner_id == owner_id {
                        out.push(action);
                    }
                }
                out
            }
        };
        actions.sort_by_key(|a| a.created_at);
        Ok(actions)
    }

    /// Record the intent to mint for this action. Insert-if-absent: a second
    /// claim fails, which is what makes reward issuance at-most-once even
    /// across retries.
    pub fn claim_mint(&self, action_id: &Uuid) -> Result<(), StoreError> {
        match &*self.backend {
            StoreBackend::InMemory(mem) => {
                let mut claims = mem.claims.lock().expect("mint claims poisoned");
                if !claims.insert(*action_id) {
                    return Err(StoreError::MintAlreadyClaimed(*action_id));
                }
                Ok(())
            }
            StoreBackend::Persistent(trees) => {
                let previous = trees
                    .claims
                    .insert(action_id.as_bytes(), &[])
                    .map_err(backend_err)?;
                if previous.is_some() {
                    return Err(StoreError::MintAlreadyClaimed(*action_id));
                }
                Ok(())
            }
        }
    }

    /// Release a claim after a failed mint so a later retry can re-attempt.
    pub fn release_mint(&self, action_id: &Uuid) -> Result<(), StoreError> {
        match &*self.backend {
            StoreBackend::InMemory(mem) => {
                mem.claims
                    .lock()
                    .expect("mint claims poisoned")
                    .remove(action_id);
                Ok(())
            }
            StoreBackend::Persistent(trees) => {
                trees
                    .claims
                    .remove(action_id.as_bytes())
                    .map_err(backend_err)?;
                Ok(())
            }
        }
    }

    pub fn record_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        match &*self.backend {
            StoreBackend::InMemory(mem) => {
                mem.transactions
                    .lock()
                    .expect("transactions poisoned")
                    .push(transaction.clone());
                Ok(())
            }
            StoreBackend::Persistent(trees) => {
                trees
                    .transactions
                    .insert(transaction.id.as_bytes(), encode(transaction)?)
                    .map_err(backend_err)?;
                Ok(())
            }
        }
    }

    pub fn transactions_for(&self, owner_id: &str) -> Result<Vec<Transaction>, StoreError> {
        let mut transactions = match &*self.backend {
            StoreBackend::InMemory(mem) => mem
                .transactions
                .lock()
                .expect("transactions poisoned")
                .iter()
                .filter(|t| t.owner_id == owner_id)
                .cloned()
                .collect::<Vec<_>>(),
            StoreBackend::Persistent(trees) => {
                let mut out = Vec::new();
                for item in trees.transactions.iter() {
                    let (_, bytes) = item.map_err(backend_err)?;
                    let transaction: Transaction = decode(&bytes)?;
                    if transaction.owner_id == owner_id {
                        out.push(transaction);
                    }
                }
                out
            }
        };
        transactions.sort_by_key(|t| t.created_at);
        Ok(transactions)
    }

    /// Derive the balance by folding the owner's ledger rows: mint minus
    /// burn, with saved CO2 summed over mints. Reconciling on read keeps
    /// this correct even when the cached profile totals lag.
    pub fn balance_of(&self, owner_id: &str) -> Result<UserBalance, StoreError> {
        let transactions = self.transactions_for(owner_id)?;
        let mut total_tokens: i64 = 0;
        let mut total_co2_saved_kg = 0.0;
        for transaction in &transactions {
            match transaction.kind {
                TransactionKind::Mint => {
                    total_tokens += transaction.amount as i64;
                    total_co2_saved_kg += transaction.metadata.co2_saved_kg;
                }
                TransactionKind::Burn => {
                    total_tokens -= transaction.amount as i64;
                }
            }
        }
        Ok(UserBalance {
            owner_id: owner_id.to_string(),
            total_tokens,
            total_co2_saved_kg,
        })
    }

    pub fn get_profile(&self, owner_id: &str) -> Result<Option<Profile>, StoreError> {
        match &*self.backend {
            StoreBackend::InMemory(mem) => Ok(mem
                .profiles
                .lock()
                .expect("profiles poisoned")
                .get(owner_id)
                .cloned()),
            StoreBackend::Persistent(trees) => trees
                .profiles
                .get(owner_id.as_bytes())
                .map_err(backend_err)?
                .map(|bytes| decode(&bytes))
                .transpose(),
        }
    }

    pub fn upsert_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        match &*self.backend {
            StoreBackend::InMemory(mem) => {
                mem.profiles
                    .lock()
                    .expect("profiles poisoned")
                    .insert(profile.owner_id.clone(), profile.clone());
                Ok(())
            }
            StoreBackend::Persistent(trees) => {
                trees
                    .profiles
                    .insert(profile.owner_id.as_bytes(), encode(profile)?)
                    .map_err(backend_err)?;
                Ok(())
            }
        }
    }

    /// Fold a reward into the profile's cumulative totals. Creates a bare
    /// profile when none exists yet.
    pub fn add_profile_totals(
        &self,
        owner_id: &str,
        tokens_delta: i64,
        co2_delta_kg: f64,
    ) -> Result<(), StoreError> {
        let mut profile = self.get_profile(owner_id)?.unwrap_or(Profile {
            owner_id: owner_id.to_string(),
            payout_address: String::new(),
            total_tokens: 0,
            total_co2_saved_kg: 0.0,
        });
        profile.total_tokens += tokens_delta;
        profile.total_co2_saved_kg += co2_delta_kg;
        self.upsert_profile(&profile)
    }
}
