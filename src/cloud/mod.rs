//! Remote auth and document store used by cloud backup.

mod memory;

pub use memory::*;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::Result;

/// Identity handed out by the remote auth service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
}

impl Identity {
    /// Anonymous identities have no email; show a short stable label instead.
    pub fn display_email(&self) -> String {
        match &self.email {
            Some(email) if !email.is_empty() => email.clone(),
            _ => format!("Anonyme-{}", self.uid.chars().take(8).collect::<String>()),
        }
    }
}

#[async_trait]
pub trait CloudAuth: Send + Sync {
    async fn sign_in_anonymously(&self) -> Result<Identity>;

    async fn sign_out(&self) -> Result<()>;

    /// Every auth state change, starting with the current one.
    fn subscribe(&self) -> watch::Receiver<Option<Identity>>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// The backup document for `uid`, if one was ever written.
    async fn get(&self, uid: &str) -> Result<Option<Value>>;

    /// Replace the backup document for `uid`.
    async fn set(&self, uid: &str, document: Value) -> Result<()>;
}
