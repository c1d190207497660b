use std::sync::Arc;

use crate::error::{SessionError, ValidationError};
use crate::models::User;
use crate::token_store::TokenStore;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Unknown after a token restore until the next sign-in.
    pub user: Option<User>,
    pub token: String,
    pub authenticated: bool,
}

impl Session {
    pub fn identity_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    pub fn display_name(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.name.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.email.trim().is_empty() || self.password.is_empty() {
            return Err(ValidationError::MissingFields);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl Registration {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() || self.email.trim().is_empty() || self.password.is_empty() {
            return Err(ValidationError::MissingFields);
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::PasswordTooShort(MIN_PASSWORD_LEN));
        }
        Ok(())
    }
}

/// Owns the current session and the persisted token behind it.
///
/// Every transition bumps `generation`, so work started under an older
/// session can tell it is stale.
pub struct SessionStore {
    tokens: Arc<dyn TokenStore>,
    session: Option<Session>,
    generation: u64,
}

impl SessionStore {
    pub fn new(tokens: Arc<dyn TokenStore>) -> Self {
        SessionStore {
            tokens,
            session: None,
            generation: 0,
        }
    }

    pub fn current(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.authenticated)
    }

    pub fn token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.token.as_str())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Loads a previously persisted token. No token means logged out.
    pub async fn restore(&mut self) -> Result<bool, SessionError> {
        self.generation += 1;
        match self.tokens.load().await? {
            Some(token) => {
                log::info!("Restored persisted session token");
                self.session = Some(Session {
                    user: None,
                    token,
                    authenticated: true,
                });
                Ok(true)
            }
            None => {
                log::debug!("No persisted token, starting logged out");
                self.session = None;
                Ok(false)
            }
        }
    }

    pub async fn establish(&mut self, user: Option<User>, token: String) -> Result<(), SessionError> {
        self.tokens.save(&token).await?;
        self.generation += 1;
        self.session = Some(Session {
            user,
            token,
            authenticated: true,
        });
        Ok(())
    }

    /// Forgets the session in memory first, then removes the persisted token.
    pub async fn logout(&mut self) -> Result<(), SessionError> {
        self.generation += 1;
        self.session = None;
        self.tokens.remove().await?;
        Ok(())
    }
}
