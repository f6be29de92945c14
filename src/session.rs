use std::fmt;

use crate::backend::StoryBackend;
use crate::error::{Error, Result};

/// The verified admin password, attached to every mutating call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Admin state held in memory only; dropping it logs out.
#[derive(Debug, Clone, Default)]
pub struct AdminSession {
    credential: Option<Credential>,
}

impl AdminSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: Some(credential),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.credential.is_some()
    }

    pub fn credential(&self) -> Result<&Credential> {
        self.credential.as_ref().ok_or(Error::NotAdmin)
    }

    /// Verify `password` with the backend and keep it on success. An empty
    /// password is rejected without a round trip.
    pub async fn login(&mut self, backend: &dyn StoryBackend, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(Error::AuthRejected);
        }
        if !backend.verify_admin_password(password).await? {
            log::warn!("admin login rejected");
            return Err(Error::AuthRejected);
        }
        log::info!("admin session started");
        self.credential = Some(Credential::new(password));
        Ok(())
    }

    pub fn logout(&mut self) {
        if self.credential.take().is_some() {
            log::info!("admin session ended");
        }
    }
}

/// Blocking user interaction the controllers need: plain alerts and yes/no
/// confirmations.
pub trait Prompter {
    fn alert(&mut self, message: &str);

    fn confirm(&mut self, message: &str) -> bool;
}

/// Prompter that answers every confirmation the same way and keeps the
/// messages it was shown.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPrompter {
    pub answer: bool,
    pub shown: Vec<String>,
}

impl ScriptedPrompter {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            shown: Vec::new(),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn alert(&mut self, message: &str) {
        self.shown.push(message.to_string());
    }

    fn confirm(&mut self, message: &str) -> bool {
        self.shown.push(message.to_string());
        self.answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[tokio::test]
    async fn login_keeps_credential_only_on_success() {
        let backend = MemoryBackend::new("secret");
        let mut session = AdminSession::new();

        let err = session.login(&backend, "nope").await.unwrap_err();
        assert!(matches!(err, Error::AuthRejected));
        assert!(!session.is_admin());
        assert!(matches!(session.credential(), Err(Error::NotAdmin)));

        session.login(&backend, "secret").await.unwrap();
        assert!(session.is_admin());
        assert_eq!(session.credential().unwrap().expose(), "secret");

        session.logout();
        assert!(!session.is_admin());
    }

    #[tokio::test]
    async fn empty_password_never_reaches_backend() {
        let backend = MemoryBackend::new("secret");
        let mut session = AdminSession::new();
        assert!(session.login(&backend, "").await.is_err());
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn credential_is_redacted() {
        let rendered = format!("{:?}", AdminSession::with_credential(Credential::new("hunter2")));
        assert!(!rendered.contains("hunter2"));
    }
}
