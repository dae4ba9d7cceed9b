//! In-process stand-ins for the DNS server used by unit tests

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use super::{
    CreateKeyRequest, KeyAlgorithm, KeyDescriptor, KeyInventory, KeyManagementClient, KeyType,
    MarkerKind, MetadataStore, PolicyParameters, RolloverEngine, RolloverError,
    RolloverPersistence, SigningKey, Zone, FLAGS_KSK, FLAGS_ZSK,
};

pub fn key(id: i64, active: bool, flags: u16, content: &str) -> SigningKey {
    SigningKey {
        id,
        zone_id: 1,
        active,
        flags,
        content: content.to_string(),
    }
}

#[derive(Default)]
struct StubState {
    calls: usize,
    created: Vec<CreateKeyRequest>,
    fail_create: bool,
    failing_keys: HashSet<i64>,
}

/// Key-management client that applies requests to the shared SQLite tables
pub struct StubKeyClient {
    store: RolloverPersistence,
    state: Mutex<StubState>,
}

impl StubKeyClient {
    pub fn new(store: RolloverPersistence) -> Self {
        Self {
            store,
            state: Mutex::new(StubState::default()),
        }
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub fn created(&self) -> Vec<CreateKeyRequest> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    pub fn fail_key(&self, key_id: i64) {
        self.state.lock().unwrap().failing_keys.insert(key_id);
    }

    async fn zone(&self, name: &str) -> Result<Zone, RolloverError> {
        self.store
            .zone_by_name(name)
            .await?
            .ok_or_else(|| RolloverError::ZoneNotFound(name.to_string()))
    }
}

#[async_trait]
impl KeyManagementClient for StubKeyClient {
    async fn create_key(
        &self,
        zone: &str,
        request: &CreateKeyRequest,
    ) -> Result<KeyDescriptor, RolloverError> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls += 1;
            if state.fail_create {
                return Err(RolloverError::ClientError("HTTP 500".to_string()));
            }
            state.created.push(request.clone());
        }

        let zone = self.zone(zone).await?;
        let flags = match request.keytype {
            KeyType::Zsk => FLAGS_ZSK,
            KeyType::Ksk | KeyType::Csk => FLAGS_KSK,
        };
        let algorithm: KeyAlgorithm = request.algorithm.parse()?;
        let content = format!("{} 3 {} NEWKEYDATA", flags, algorithm.number());
        let id = self.store.insert_key(zone.id, flags, true, &content).await?;

        Ok(KeyDescriptor {
            id,
            active: true,
            keytype: Some(request.keytype.to_string()),
            algorithm: Some(request.algorithm.clone()),
        })
    }

    async fn set_key_active(
        &self,
        _zone: &str,
        key_id: i64,
        active: bool,
    ) -> Result<(), RolloverError> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls += 1;
            if state.failing_keys.contains(&key_id) {
                return Err(RolloverError::ClientError(format!("HTTP 502 for key {}", key_id)));
            }
        }
        self.store.set_key_active(key_id, active).await?;
        Ok(())
    }

    async fn delete_key(&self, _zone: &str, key_id: i64) -> Result<(), RolloverError> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls += 1;
            if state.failing_keys.contains(&key_id) {
                return Err(RolloverError::ClientError(format!("HTTP 503 for key {}", key_id)));
            }
        }
        self.store.delete_key(key_id).await?;
        Ok(())
    }
}

/// In-memory database plus stub client wired into an engine
pub struct Harness {
    pub store: RolloverPersistence,
    pub client: Arc<StubKeyClient>,
    pub policy: PolicyParameters,
}

impl Harness {
    pub async fn new() -> Self {
        let store = RolloverPersistence::in_memory().unwrap();
        let client = Arc::new(StubKeyClient::new(store.clone()));
        Self {
            store,
            client,
            policy: PolicyParameters::default(),
        }
    }

    pub fn engine(&self, dry_run: bool) -> RolloverEngine {
        RolloverEngine::new(
            self.policy.clone(),
            self.client.clone(),
            Arc::new(self.store.clone()),
            Arc::new(self.store.clone()),
            dry_run,
        )
    }

    pub async fn zone(&self, name: &str) -> Zone {
        self.store.upsert_zone(name).await.unwrap()
    }

    pub async fn keys(&self, zone: &Zone) -> Vec<SigningKey> {
        self.store.list_keys(zone.id).await.unwrap()
    }

    pub async fn marker(&self, zone: &Zone, kind: MarkerKind) -> Option<String> {
        self.store.get(zone.id, &kind.as_key()).await.unwrap()
    }

    pub async fn set_marker(&self, zone: &Zone, kind: MarkerKind, value: &str) {
        self.store.set(zone.id, &kind.as_key(), value).await.unwrap();
    }
}
