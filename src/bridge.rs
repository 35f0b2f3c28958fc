//! Native collaborators (home-screen widget, adhan audio service) that need
//! the session's auth token to call the API on their own.

use crate::error::Result;

pub trait NativeBridge: Send + Sync {
    fn push_auth_token(&self, token: &str) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBridge;

impl NativeBridge for NoopBridge {
    fn push_auth_token(&self, _token: &str) -> Result<()> {
        Ok(())
    }
}
