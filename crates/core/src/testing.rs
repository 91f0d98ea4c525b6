//! Test doubles shared by the unit tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::identity::{IdentityService, LocalIdentityService};
use crate::model::Principal;
use crate::store::{Collection, Document, DocumentData, DocumentStore, LocalDocumentStore, Query};
use crate::{Error, Result};

pub const TEST_PASSWORD: &str = "password123";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    List,
    Get,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub collection: Collection,
    pub id: Option<String>,
}

/// Local store that records every call and fails the ones it is told to.
#[derive(Default)]
pub struct RecordingStore {
    inner: LocalDocumentStore,
    calls: Mutex<Vec<Call>>,
    // A rule without an id matches every document of the collection
    failures: Mutex<Vec<Call>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &LocalDocumentStore {
        &self.inner
    }

    pub fn fail_lists(&self, collection: Collection) {
        self.push_failure(Op::List, collection, None);
    }

    pub fn fail_op(&self, op: Op, collection: Collection, id: &str) {
        self.push_failure(op, collection, Some(id.to_string()));
    }

    pub fn fail_all(&self, op: Op, collection: Collection) {
        self.push_failure(op, collection, None);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of remote calls issued so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn count_ops(&self, op: Op, collection: Collection) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.op == op && call.collection == collection)
            .count()
    }

    pub fn deletes(&self) -> Vec<(Collection, String)> {
        self.calls()
            .into_iter()
            .filter(|call| call.op == Op::Delete)
            .filter_map(|call| call.id.map(|id| (call.collection, id)))
            .collect()
    }

    fn push_failure(&self, op: Op, collection: Collection, id: Option<String>) {
        self.failures
            .lock()
            .unwrap()
            .push(Call { op, collection, id });
    }

    fn record(&self, op: Op, collection: Collection, id: Option<&str>) -> Result<()> {
        let call = Call {
            op,
            collection,
            id: id.map(str::to_string),
        };
        self.calls.lock().unwrap().push(call.clone());
        let failing = self.failures.lock().unwrap().iter().any(|rule| {
            rule.op == op
                && rule.collection == collection
                && (rule.id.is_none() || rule.id == call.id)
        });
        if failing {
            return Err(Error::remote(Some(503), "Injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn list_documents(&self, collection: Collection, queries: &[Query]) -> Result<Vec<Document>> {
        self.record(Op::List, collection, None)?;
        self.inner.list_documents(collection, queries).await
    }

    async fn get_document(&self, collection: Collection, id: &str) -> Result<Document> {
        self.record(Op::Get, collection, Some(id))?;
        self.inner.get_document(collection, id).await
    }

    async fn create_document(&self, collection: Collection, data: DocumentData) -> Result<Document> {
        self.record(Op::Create, collection, None)?;
        self.inner.create_document(collection, data).await
    }

    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        data: DocumentData,
    ) -> Result<Document> {
        self.record(Op::Update, collection, Some(id))?;
        self.inner.update_document(collection, id, data).await
    }

    async fn delete_document(&self, collection: Collection, id: &str) -> Result<()> {
        self.record(Op::Delete, collection, Some(id))?;
        self.inner.delete_document(collection, id).await
    }
}

/// Register (if needed) and sign in an account carrying `labels`.
pub async fn sign_in(identity: &LocalIdentityService, email: &str, labels: &[&str]) -> Principal {
    let _ = identity.delete_session().await;
    let created = identity.create_account(email, TEST_PASSWORD, "Test User").await;
    if let Ok(principal) = created {
        identity
            .set_labels(&principal.id, labels.iter().copied())
            .await
            .unwrap();
    }
    identity.create_session(email, TEST_PASSWORD).await.unwrap()
}
