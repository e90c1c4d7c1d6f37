//! Server-side user accounts and bearer-token sessions, stored in the
//! `users` and `sessions` tables.

use chrono::{Duration, Utc};
use sqlx::{Row, SqlitePool};

use crate::api::AuthUser;
use crate::auth::{generate_salt, generate_token, hash_password, SESSION_TTL_HOURS};
use crate::error::{NoteError, Result};
use crate::models::new_id;

pub async fn register(
    pool: &SqlitePool,
    username: &str,
    email: &str,
    password: &str,
) -> Result<AuthUser> {
    let username = username.trim();
    if username.is_empty() {
        return Err(NoteError::validation("username must not be empty"));
    }
    if password.is_empty() {
        return Err(NoteError::validation("password must not be empty"));
    }

    let taken: Option<String> =
        sqlx::query_scalar("SELECT id FROM users WHERE username = ? COLLATE NOCASE")
            .bind(username)
            .fetch_optional(pool)
            .await?;
    if taken.is_some() {
        return Err(NoteError::validation(format!(
            "username '{}' is already taken",
            username
        )));
    }

    let user = AuthUser {
        id: new_id(),
        username: username.to_string(),
        email: email.trim().to_string(),
    };
    let salt = generate_salt();
    sqlx::query(
        "INSERT INTO users (id, username, email, password_hash, salt, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.id)
    .bind(&user.username)
    .bind(&user.email)
    .bind(hash_password(&salt, password))
    .bind(&salt)
    .bind(Utc::now().timestamp_millis())
    .execute(pool)
    .await?;
    Ok(user)
}

/// The user when the password matches, `None` otherwise.
pub async fn verify(pool: &SqlitePool, username: &str, password: &str) -> Result<Option<AuthUser>> {
    let row = sqlx::query(
        "SELECT id, username, email, password_hash, salt FROM users \
         WHERE username = ? COLLATE NOCASE",
    )
    .bind(username.trim())
    .fetch_optional(pool)
    .await?;

    let row = match row {
        Some(r) => r,
        None => return Ok(None),
    };
    let salt: String = row.get("salt");
    let expected: String = row.get("password_hash");
    if hash_password(&salt, password) != expected {
        return Ok(None);
    }
    Ok(Some(AuthUser {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
    }))
}

pub async fn open_session(pool: &SqlitePool, user_id: &str) -> Result<String> {
    let token = generate_token();
    sqlx::query("INSERT INTO sessions (token, user_id, created_at) VALUES (?, ?, ?)")
        .bind(&token)
        .bind(user_id)
        .bind(Utc::now().timestamp_millis())
        .execute(pool)
        .await?;
    Ok(token)
}

/// The user a live token belongs to. Expired sessions are deleted.
pub async fn resolve(pool: &SqlitePool, token: &str) -> Result<Option<AuthUser>> {
    let row = sqlx::query(
        "SELECT u.id, u.username, u.email, s.created_at FROM sessions s \
         JOIN users u ON u.id = s.user_id WHERE s.token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    let row = match row {
        Some(r) => r,
        None => return Ok(None),
    };
    let created_at: i64 = row.get("created_at");
    let cutoff = (Utc::now() - Duration::hours(SESSION_TTL_HOURS)).timestamp_millis();
    if created_at < cutoff {
        close_session(pool, token).await?;
        return Ok(None);
    }
    Ok(Some(AuthUser {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
    }))
}

pub async fn close_session(pool: &SqlitePool, token: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}
