//! Authentication as an ordered list of strategies.
//!
//! [`Authenticator::login`] tries each [`AuthStrategy`] in turn and keeps the
//! first session it gets. A rejection or an error moves on to the next
//! strategy; when every strategy fails the result is [`NoteError::Auth`]
//! naming what each one said.
//!
//! | Strategy | Checks against |
//! |----------|----------------|
//! | [`RestLogin`] | `POST /auth/login` on the REST server |
//! | [`LocalUsers`] | users registered in `noteapp_users` |
//! | [`StaticCredential`] | the `[auth.demo]` credential from config |
//!
//! Sessions are saved in `noteapp_auth` and stay valid for 24 hours.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::backend::RestBackend;
use crate::config::DemoCredential;
use crate::error::{NoteError, Result};
use crate::kv::{keys, LocalKv};
use crate::models::new_id;

pub const SESSION_TTL_HOURS: i64 = 24;

/// An authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Owner id used to scope hosted data.
    pub owner_id: String,
    pub username: String,
    /// Bearer token, when the strategy issued one.
    #[serde(default)]
    pub token: Option<String>,
    /// Name of the strategy that produced this session.
    pub strategy: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at >= Duration::hours(SESSION_TTL_HOURS)
    }
}

pub enum AuthOutcome {
    Authenticated(Session),
    Rejected(String),
}

#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthOutcome>;
}

pub struct Authenticator {
    strategies: Vec<Box<dyn AuthStrategy>>,
    kv: LocalKv,
}

impl Authenticator {
    pub fn new(kv: LocalKv) -> Self {
        Self {
            strategies: Vec::new(),
            kv,
        }
    }

    pub fn with(mut self, strategy: impl AuthStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try every strategy in order and persist the first session.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
        if self.strategies.is_empty() {
            return Err(NoteError::Auth("no authentication strategy configured".into()));
        }

        let mut reasons = Vec::new();
        for strategy in &self.strategies {
            match strategy.authenticate(username, password).await {
                Ok(AuthOutcome::Authenticated(session)) => {
                    self.kv.set_json(keys::AUTH, &session)?;
                    info!(
                        strategy = strategy.name(),
                        username = %session.username,
                        "authenticated"
                    );
                    return Ok(session);
                }
                Ok(AuthOutcome::Rejected(reason)) => {
                    warn!(strategy = strategy.name(), reason = %reason, "login rejected, trying next strategy");
                    reasons.push(format!("{}: {}", strategy.name(), reason));
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "login failed, trying next strategy");
                    reasons.push(format!("{}: {}", strategy.name(), e));
                }
            }
        }
        Err(NoteError::Auth(reasons.join("; ")))
    }

    /// The saved session, if there is one younger than 24 hours.
    /// Expired or unreadable sessions are removed.
    pub fn restore_session(&self) -> Result<Option<Session>> {
        let session = match self.kv.get_json::<Session>(keys::AUTH) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "discarding unreadable session");
                self.kv.remove(keys::AUTH)?;
                return Ok(None);
            }
        };
        match session {
            Some(s) if s.is_expired(Utc::now()) => {
                info!(username = %s.username, "session expired");
                self.kv.remove(keys::AUTH)?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Forget the session and any stored bearer token.
    pub fn logout(&self) -> Result<()> {
        self.kv.remove(keys::AUTH)?;
        self.kv.remove(keys::TOKEN)
    }
}

// ============ Strategies ============

/// Log in against the REST server; the token it returns is stored.
pub struct RestLogin {
    rest: Arc<RestBackend>,
}

impl RestLogin {
    pub fn new(rest: Arc<RestBackend>) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl AuthStrategy for RestLogin {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthOutcome> {
        let payload = self.rest.login(username, password).await?;
        Ok(AuthOutcome::Authenticated(Session {
            owner_id: payload.user.id,
            username: payload.user.username,
            token: Some(payload.token),
            strategy: self.name().to_string(),
            created_at: Utc::now(),
        }))
    }
}

/// A user registered on this machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub salt: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Users kept in the local key/value store under `noteapp_users`.
pub struct LocalUsers {
    kv: LocalKv,
}

impl LocalUsers {
    pub fn new(kv: LocalKv) -> Self {
        Self { kv }
    }

    fn load(&self) -> Result<Vec<LocalUser>> {
        Ok(self.kv.get_json(keys::USERS)?.unwrap_or_default())
    }

    pub fn register(&self, username: &str, email: &str, password: &str) -> Result<LocalUser> {
        let username = username.trim();
        if username.is_empty() {
            return Err(NoteError::validation("username must not be empty"));
        }
        if password.is_empty() {
            return Err(NoteError::validation("password must not be empty"));
        }
        let mut users = self.load()?;
        if users.iter().any(|u| u.username.eq_ignore_ascii_case(username)) {
            return Err(NoteError::validation(format!(
                "user '{}' already exists",
                username
            )));
        }
        let salt = generate_salt();
        let user = LocalUser {
            id: new_id(),
            username: username.to_string(),
            email: email.trim().to_string(),
            password_hash: hash_password(&salt, password),
            salt,
            created_at: Utc::now(),
        };
        users.push(user.clone());
        self.kv.set_json(keys::USERS, &users)?;
        Ok(user)
    }
}

#[async_trait]
impl AuthStrategy for LocalUsers {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthOutcome> {
        let users = self.load()?;
        let user = match users
            .iter()
            .find(|u| u.username.eq_ignore_ascii_case(username.trim()))
        {
            Some(u) => u,
            None => return Ok(AuthOutcome::Rejected("unknown user".into())),
        };
        if hash_password(&user.salt, password) != user.password_hash {
            return Ok(AuthOutcome::Rejected("wrong password".into()));
        }
        Ok(AuthOutcome::Authenticated(Session {
            owner_id: user.id.clone(),
            username: user.username.clone(),
            token: None,
            strategy: self.name().to_string(),
            created_at: Utc::now(),
        }))
    }
}

/// The optional fixed credential from `[auth.demo]`.
pub struct StaticCredential {
    credential: DemoCredential,
}

impl StaticCredential {
    pub fn new(credential: DemoCredential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl AuthStrategy for StaticCredential {
    fn name(&self) -> &'static str {
        "demo"
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthOutcome> {
        if username == self.credential.username && password == self.credential.password {
            Ok(AuthOutcome::Authenticated(Session {
                owner_id: self.credential.user_id.clone(),
                username: self.credential.username.clone(),
                token: None,
                strategy: self.name().to_string(),
                created_at: Utc::now(),
            }))
        } else {
            Ok(AuthOutcome::Rejected("credentials do not match".into()))
        }
    }
}

// ============ Password Hashing ============

pub fn generate_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `hex(sha256(salt ":" password))`.
pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Random bearer token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn demo() -> DemoCredential {
        DemoCredential {
            username: "demo".into(),
            password: "demo-pass".into(),
            user_id: "demo-user".into(),
        }
    }

    struct Failing;

    #[async_trait]
    impl AuthStrategy for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn authenticate(&self, _username: &str, _password: &str) -> Result<AuthOutcome> {
            Err(NoteError::backend("connection refused"))
        }
    }

    #[tokio::test]
    async fn falls_through_to_next_strategy() {
        let tmp = TempDir::new().unwrap();
        let kv = LocalKv::open(tmp.path()).unwrap();
        let auth = Authenticator::new(kv.clone())
            .with(Failing)
            .with(LocalUsers::new(kv.clone()))
            .with(StaticCredential::new(demo()));

        let session = auth.login("demo", "demo-pass").await.unwrap();
        assert_eq!(session.strategy, "demo");
        assert_eq!(session.owner_id, "demo-user");
        assert_eq!(auth.restore_session().unwrap(), Some(session));
    }

    #[tokio::test]
    async fn local_users_verify_salted_hash() {
        let tmp = TempDir::new().unwrap();
        let kv = LocalKv::open(tmp.path()).unwrap();
        let users = LocalUsers::new(kv.clone());
        let alice = users.register("alice", "a@example.com", "s3cret").unwrap();
        assert_ne!(alice.password_hash, "s3cret");
        assert!(users.register("ALICE", "", "x").is_err());

        let auth = Authenticator::new(kv.clone()).with(LocalUsers::new(kv));
        let session = auth.login("alice", "s3cret").await.unwrap();
        assert_eq!(session.owner_id, alice.id);

        let err = auth.login("alice", "wrong").await.unwrap_err();
        assert!(err.to_string().contains("local: wrong password"));
    }

    #[tokio::test]
    async fn every_strategy_failing_is_an_auth_error() {
        let tmp = TempDir::new().unwrap();
        let kv = LocalKv::open(tmp.path()).unwrap();
        let auth = Authenticator::new(kv)
            .with(Failing)
            .with(StaticCredential::new(demo()));
        let err = auth.login("demo", "nope").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("failing: connection refused"));
        assert!(msg.contains("demo: credentials do not match"));
    }

    #[test]
    fn sessions_expire_after_a_day() {
        let tmp = TempDir::new().unwrap();
        let kv = LocalKv::open(tmp.path()).unwrap();
        let stale = Session {
            owner_id: "u".into(),
            username: "u".into(),
            token: None,
            strategy: "local".into(),
            created_at: Utc::now() - Duration::hours(SESSION_TTL_HOURS + 1),
        };
        kv.set_json(keys::AUTH, &stale).unwrap();
        let auth = Authenticator::new(kv.clone());
        assert_eq!(auth.restore_session().unwrap(), None);
        assert_eq!(kv.get(keys::AUTH).unwrap(), None);
    }

    #[test]
    fn logout_clears_session_and_token() {
        let tmp = TempDir::new().unwrap();
        let kv = LocalKv::open(tmp.path()).unwrap();
        kv.set(keys::TOKEN, "abc").unwrap();
        kv.set(keys::AUTH, "{}").unwrap();
        Authenticator::new(kv.clone()).logout().unwrap();
        assert_eq!(kv.get(keys::TOKEN).unwrap(), None);
        assert_eq!(kv.get(keys::AUTH).unwrap(), None);
    }
}
