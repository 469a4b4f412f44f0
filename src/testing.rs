//! Shared fixtures for unit tests.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    evolution::{Gateway, GatewayAction, GatewayError},
    store::memory::MemoryStore,
    types::{Credentials, Customer},
};

pub const USER: &str = "user-1";
pub const CONFIG: &str = "cfg-1";
pub const INTEGRATION: &str = "int-1";

/// Gateway double: succeeds with sequential wamids unless the number is marked failing.
#[derive(Default)]
pub struct FakeGateway {
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<GatewayAction>>,
    counter: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, number: &str) {
        self.failing.lock().unwrap().insert(number.to_string());
    }

    pub fn calls(&self) -> Vec<GatewayAction> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

fn action_number(action: &GatewayAction) -> Option<&str> {
    match action {
        GatewayAction::SendText { number, .. }
        | GatewayAction::SendMedia { number, .. }
        | GatewayAction::SendButtons { number, .. } => Some(number),
        _ => None,
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn execute(
        &self,
        _credentials: &Credentials,
        action: &GatewayAction,
    ) -> Result<Value, GatewayError> {
        self.calls.lock().unwrap().push(action.clone());
        if let Some(number) = action_number(action) {
            if self.failing.lock().unwrap().contains(number) {
                return Err(GatewayError::Status {
                    status: 400,
                    body: json!({ "message": "number not on whatsapp" }),
                });
            }
        }
        if !action.is_send() {
            return Ok(json!({ "instance": { "instanceName": "sales", "state": "open" } }));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({ "key": { "id": format!("WAMID-{n}") }, "status": "PENDING" }))
    }
}

pub fn credentials() -> Credentials {
    Credentials {
        user_id: USER.into(),
        integration_id: INTEGRATION.into(),
        integration_config_id: CONFIG.into(),
        api_key: "key".into(),
        base_url: "http://gateway.test".into(),
        instance_name: "sales".into(),
        instance_token: "instance-token".into(),
    }
}

pub fn store_with_integration() -> MemoryStore {
    let store = MemoryStore::new();
    store.with(|data| data.credentials.push(credentials()));
    store
}

pub fn customer(id: &str, name: &str, phone: &str) -> Customer {
    Customer {
        id: id.into(),
        user_id: USER.into(),
        name: name.into(),
        phone_number: phone.into(),
        email: String::new(),
        company: String::new(),
        created_at: "2026-01-01T00:00:00+00:00".into(),
        updated_at: "2026-01-01T00:00:00+00:00".into(),
    }
}
