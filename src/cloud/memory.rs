use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use super::{CloudAuth, DocumentStore, Identity};
use crate::error::{Result, SyncError};

/// In-process auth and document store. Counts writes so callers can check
/// that nothing reached the "remote" side.
#[derive(Debug)]
pub struct MemoryCloud {
    state: watch::Sender<Option<Identity>>,
    documents: RwLock<HashMap<String, Value>>,
    writes: AtomicUsize,
    reads: AtomicUsize,
    sign_ins: AtomicUsize,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCloud {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state,
            documents: RwLock::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            sign_ins: AtomicUsize::new(0),
        }
    }

    /// Seed a document as if another device had backed up.
    pub fn put_document(&self, uid: &str, document: Value) {
        if let Ok(mut docs) = self.documents.write() {
            docs.insert(uid.to_string(), document);
        }
    }

    pub fn document(&self, uid: &str) -> Option<Value> {
        self.documents.read().ok()?.get(uid).cloned()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.state.borrow().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn sign_in_count(&self) -> usize {
        self.sign_ins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudAuth for MemoryCloud {
    async fn sign_in_anonymously(&self) -> Result<Identity> {
        self.sign_ins.fetch_add(1, Ordering::SeqCst);

        // Anonymous sign-in is sticky: signing in again returns the same identity
        if let Some(identity) = self.current_identity() {
            return Ok(identity);
        }

        let identity = Identity {
            uid: uuid::Uuid::new_v4().simple().to_string(),
            email: None,
        };
        self.state.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<()> {
        self.state.send_replace(None);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.state.subscribe()
    }
}

#[async_trait]
impl DocumentStore for MemoryCloud {
    async fn get(&self, uid: &str) -> Result<Option<Value>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let docs = self
            .documents
            .read()
            .map_err(|_| SyncError::cloud("document store lock poisoned"))?;
        Ok(docs.get(uid).cloned())
    }

    async fn set(&self, uid: &str, document: Value) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut docs = self
            .documents
            .write()
            .map_err(|_| SyncError::cloud("document store lock poisoned"))?;
        docs.insert(uid.to_string(), document);
        Ok(())
    }
}
