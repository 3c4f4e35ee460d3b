use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use rand::Rng;
use tracing::{info, warn};

use convene_db::Store;
use convene_types::api::{
    AuthResponse, InviteCodeResponse, InviteValidation, InviteValidationQuery, LoginRequest,
    RegisterRequest,
};
use convene_types::models::UserSummary;
use convene_types::normalize_username;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const INVITE_PREFIX: &str = "CITE";
const INVITE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Registration, login and invite codes.
pub struct Identity<'a> {
    store: &'a dyn Store,
}

impl<'a> Identity<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    pub fn register(&self, req: &RegisterRequest) -> ApiResult<AuthResponse> {
        let username = req.username.trim();
        if username.is_empty() || req.password.is_empty() {
            return Err(ApiError::invalid("Username and password are required"));
        }

        if let Some(code) = req.invite_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            if self.store.find_user_by_invite_code(code)?.is_none() {
                return Err(ApiError::invalid("Invalid invite code"));
            }
        }

        let password_hash = hash_password(&req.password)?;
        let id = self
            .store
            .create_user(username, &normalize_username(username), Some(&password_hash))?
            .ok_or_else(|| ApiError::Conflict("Username already exists".into()))?;

        info!("Registered user {} ({})", username, id);
        Ok(AuthResponse {
            id,
            username: username.to_string(),
        })
    }

    pub fn login(&self, req: &LoginRequest) -> ApiResult<AuthResponse> {
        let user = self
            .store
            .find_user(&normalize_username(&req.username))?
            .ok_or_else(|| ApiError::not_found("User not found"))?;

        let verified = match user.password_hash.as_deref() {
            Some(hash) => verify_password(&req.password, hash),
            None => false,
        };
        if !verified {
            return Err(ApiError::Unauthorized("Invalid credentials".into()));
        }

        Ok(AuthResponse {
            id: user.id,
            username: user.username,
        })
    }

    pub fn list_users(&self) -> ApiResult<Vec<UserSummary>> {
        Ok(self
            .store
            .list_users()?
            .into_iter()
            .map(|u| UserSummary {
                id: u.id,
                username: u.username,
            })
            .collect())
    }

    /// Returns the user's invite code, issuing one on first use.
    pub fn invite_code(&self, username: &str) -> ApiResult<InviteCodeResponse> {
        let user = self
            .store
            .find_user(&normalize_username(username))?
            .ok_or_else(|| ApiError::not_found("User not found"))?;

        let invite_code = match user.invite_code.filter(|c| !c.is_empty()) {
            Some(code) => code,
            None => self.issue_invite_code(&user.username)?,
        };
        Ok(InviteCodeResponse {
            username: user.username,
            invite_code,
        })
    }

    pub fn rotate_invite_code(&self, username: &str) -> ApiResult<InviteCodeResponse> {
        let user = self
            .store
            .find_user(&normalize_username(username))?
            .ok_or_else(|| ApiError::not_found("User not found"))?;

        let invite_code = self.issue_invite_code(&user.username)?;
        Ok(InviteCodeResponse {
            username: user.username,
            invite_code,
        })
    }

    pub fn validate_invite_code(&self, code: &str) -> ApiResult<InviteValidation> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ApiError::invalid("Invite code is required"));
        }

        let inviter = self.store.find_user_by_invite_code(code)?.map(|u| u.username);
        Ok(InviteValidation {
            valid: inviter.is_some(),
            inviter,
        })
    }

    /// Creates the user or resets its password. Used for development
    /// accounts.
    pub fn seed_user(&self, username: &str, password: &str) -> ApiResult<()> {
        let key = normalize_username(username);
        let password_hash = hash_password(password)?;
        if self.store.create_user(username, &key, Some(&password_hash))?.is_none() {
            self.store.set_password_hash(&key, &password_hash)?;
        }
        Ok(())
    }

    fn issue_invite_code(&self, username: &str) -> ApiResult<String> {
        let code = loop {
            let candidate = generate_invite_code();
            if self.store.find_user_by_invite_code(&candidate)?.is_none() {
                break candidate;
            }
            warn!("Invite code collision, retrying");
        };

        if !self.store.set_invite_code(&normalize_username(username), &code)? {
            return Err(ApiError::not_found("User not found"));
        }
        info!("Issued invite code for {}", username);
        Ok(code)
    }
}

/// `CITE-XXXX-XXXX` with uppercase alphanumeric segments.
pub fn generate_invite_code() -> String {
    let mut rng = rand::rng();
    let mut segment = || -> String {
        (0..4)
            .map(|_| INVITE_ALPHABET[rng.random_range(0..INVITE_ALPHABET.len())] as char)
            .collect()
    };
    let first = segment();
    let second = segment();
    format!("{INVITE_PREFIX}-{first}-{second}")
}

fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Unreadable password hash: {}", e);
            false
        }
    }
}

// -- Handlers --

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let user = state.run(move |store| Identity::new(store).register(&req)).await?;
    Ok(Json(user))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let user = state.run(move |store| Identity::new(store).login(&req)).await?;
    Ok(Json(user))
}

pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<UserSummary>>> {
    let users = state.run(|store| Identity::new(store).list_users()).await?;
    Ok(Json(users))
}

pub async fn get_invite_code(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<InviteCodeResponse>> {
    let code = state
        .run(move |store| Identity::new(store).invite_code(&username))
        .await?;
    Ok(Json(code))
}

pub async fn rotate_invite_code(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<InviteCodeResponse>> {
    let code = state
        .run(move |store| Identity::new(store).rotate_invite_code(&username))
        .await?;
    Ok(Json(code))
}

pub async fn validate_invite(
    State(state): State<AppState>,
    Query(query): Query<InviteValidationQuery>,
) -> ApiResult<Json<InviteValidation>> {
    let result = state
        .run(move |store| Identity::new(store).validate_invite_code(&query.code))
        .await?;
    Ok(Json(result))
}
