//! Shared fixtures for csvl-loader integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use csvl_loader::models::ResourceDocument;
use csvl_loader::services::{
    ContainerRef, MatchKey, ProgressSink, RemoteClient, RemoteError, RemoteResource,
    ResourceKind, SecondaryResource,
};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// In-memory remote store
///
/// Upserts are keyed by match filter. Scripted errors are returned, one per
/// attempt, before a resource's upsert starts succeeding.
#[derive(Default)]
pub struct MockRemoteClient {
    upsert_errors: Mutex<HashMap<String, VecDeque<RemoteError>>>,
    always_fail: Mutex<HashMap<String, RemoteError>>,
    container_error: Mutex<Option<RemoteError>>,
    scope_errors: Mutex<HashMap<String, RemoteError>>,
    secondary_errors: Mutex<HashMap<String, RemoteError>>,
    fetch_error: Mutex<Option<RemoteError>>,
    cancel_on_upsert: Mutex<Option<CancellationToken>>,

    pub upsert_calls: Mutex<Vec<(String, Value)>>,
    pub scope_calls: Mutex<Vec<(String, String)>>,
    pub secondary_calls: Mutex<Vec<(String, Value)>>,
    pub fetched_urls: Mutex<Vec<String>>,
    pub container_calls: AtomicUsize,

    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Duration,
}

impl MockRemoteClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every upsert holds its slot for `latency`
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Fail the next attempts matching `filter` with these errors, in order
    pub fn fail_first(&self, filter: &str, errors: Vec<RemoteError>) {
        self.upsert_errors
            .lock()
            .unwrap()
            .insert(filter.to_string(), errors.into());
    }

    pub fn fail_always(&self, filter: &str, error: RemoteError) {
        self.always_fail
            .lock()
            .unwrap()
            .insert(filter.to_string(), error);
    }

    pub fn fail_container(&self, error: RemoteError) {
        *self.container_error.lock().unwrap() = Some(error);
    }

    /// Every scope update of resource `id` fails with `error`
    pub fn fail_scope(&self, id: &str, error: RemoteError) {
        self.scope_errors.lock().unwrap().insert(id.to_string(), error);
    }

    /// Every redirector write for resource `id` fails with `error`
    pub fn fail_secondary(&self, id: &str, error: RemoteError) {
        self.secondary_errors
            .lock()
            .unwrap()
            .insert(id.to_string(), error);
    }

    /// Every artifact download fails with `error`
    pub fn fail_fetch(&self, error: RemoteError) {
        *self.fetch_error.lock().unwrap() = Some(error);
    }

    pub fn scopes_for(&self, id: &str) -> usize {
        self.scope_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(scoped, _)| scoped == id)
            .count()
    }

    /// Cancel `token` as soon as the first upsert starts
    pub fn cancel_on_first_upsert(&self, token: CancellationToken) {
        *self.cancel_on_upsert.lock().unwrap() = Some(token);
    }

    pub fn upserts_for(&self, filter: &str) -> usize {
        self.upsert_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(f, _)| f == filter)
            .count()
    }

    pub fn total_upserts(&self) -> usize {
        self.upsert_calls.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteClient for MockRemoteClient {
    async fn ensure_container(&self, name: &str) -> Result<ContainerRef, RemoteError> {
        self.container_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.container_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(ContainerRef {
            id: "P1".to_string(),
            name: name.to_string(),
        })
    }

    async fn upsert(
        &self,
        _kind: ResourceKind,
        document: &Value,
        key: &MatchKey,
    ) -> Result<RemoteResource, RemoteError> {
        let filter = key.filter();
        self.upsert_calls
            .lock()
            .unwrap()
            .push((filter.clone(), document.clone()));

        let cancel = self.cancel_on_upsert.lock().unwrap().take();
        if let Some(token) = cancel {
            token.cancel();
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let permanent = self.always_fail.lock().unwrap().get(&filter).cloned();
        if let Some(error) = permanent {
            return Err(error);
        }
        let scripted = self
            .upsert_errors
            .lock()
            .unwrap()
            .get_mut(&filter)
            .and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            return Err(error);
        }

        Ok(RemoteResource {
            id: format!("U-{}", filter),
            fields: document.as_object().cloned().unwrap_or_default(),
        })
    }

    async fn update_scope(
        &self,
        _kind: ResourceKind,
        id: &str,
        container: &ContainerRef,
    ) -> Result<(), RemoteError> {
        self.scope_calls
            .lock()
            .unwrap()
            .push((id.to_string(), container.id.clone()));

        let scripted = self.scope_errors.lock().unwrap().get(id).cloned();
        match scripted {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn upsert_secondary(
        &self,
        _kind: ResourceKind,
        id: &str,
        payload: &Value,
    ) -> Result<SecondaryResource, RemoteError> {
        let count = {
            let mut calls = self.secondary_calls.lock().unwrap();
            calls.push((id.to_string(), payload.clone()));
            calls.len()
        };

        let scripted = self.secondary_errors.lock().unwrap().get(id).cloned();
        if let Some(error) = scripted {
            return Err(error);
        }
        Ok(SecondaryResource {
            short_id: Some(format!("s{}", count)),
            short_domain: Some("tn.gg".to_string()),
        })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        self.fetched_urls.lock().unwrap().push(url.to_string());

        let scripted = self.fetch_error.lock().unwrap().clone();
        if let Some(error) = scripted {
            return Err(error);
        }
        Ok(b"\x89PNG".to_vec())
    }
}

/// Progress sink remembering every report
#[derive(Default)]
pub struct RecordingProgress {
    pub reports: Mutex<Vec<(usize, usize)>>,
    pub failures: Mutex<Vec<usize>>,
    pub finished: AtomicUsize,
}

impl RecordingProgress {
    pub fn reports(&self) -> Vec<(usize, usize)> {
        self.reports.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn progress(&self, _label: &str, processed: usize, total: usize) {
        self.reports.lock().unwrap().push((processed, total));
    }

    fn failed(&self, outcome: &csvl_loader::models::UpsertOutcome) {
        self.failures.lock().unwrap().push(outcome.ordinal);
    }

    fn finished(&self, _ledger: &csvl_loader::models::Ledger) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// `{"name": <name>}` documents with ordinals 0..
pub fn named_documents(names: &[&str]) -> Vec<ResourceDocument> {
    names
        .iter()
        .enumerate()
        .map(|(ordinal, name)| document(ordinal, json!({ "name": name })))
        .collect()
}

pub fn document(ordinal: usize, body: Value) -> ResourceDocument {
    let body: Map<String, Value> = body.as_object().cloned().unwrap_or_default();
    ResourceDocument::new(ordinal, body)
}

pub fn api_error(status: u16) -> RemoteError {
    RemoteError::Api {
        status,
        message: format!("status {}", status),
    }
}
