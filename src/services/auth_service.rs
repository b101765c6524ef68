use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::entities::user;
use crate::db::enums::{ApiKeyOwner, UserRole};
use crate::db::services::{api_key_service, user_service};
use crate::error::FleetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRole {
    Admin,
    Server,
}

/// Claims of a long-lived API key. Keys carry no `exp`; revocation goes through `api_keys.expires_at`.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyClaims {
    pub sub: String,
    pub role: KeyRole,
    pub iat: i64,
    pub jti: String,
}

pub fn create_key(subject: &str, role: KeyRole, secret: &str) -> Result<String, FleetError> {
    let claims = KeyClaims {
        sub: subject.to_owned(),
        role,
        iat: Utc::now().timestamp(),
        jti: Uuid::new_v4().to_string(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))
        .map_err(|e| FleetError::Internal(format!("key creation failed: {e}")))
}

pub fn decode_key(key: &str, secret: &str) -> Result<KeyClaims, FleetError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    decode::<KeyClaims>(key, &DecodingKey::from_secret(secret.as_ref()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            warn!(error = ?e, "API key decoding failed.");
            FleetError::Unauthorized("bad key".to_string())
        })
}

pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

pub fn hash_password(password: &str) -> Result<String, FleetError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| FleetError::Internal(format!("password hashing failed: {e}")))
}

/// Issues an admin key for a valid email/password pair and records its hash.
pub async fn login_admin(
    db: &DatabaseConnection,
    email: &str,
    password: &str,
    secret: &str,
) -> Result<String, FleetError> {
    let user = user_service::get_user_by_email(db, email)
        .await?
        .filter(|u| u.role == UserRole::Admin)
        .ok_or_else(|| FleetError::Unauthorized("invalid credentials".to_string()))?;

    let valid = bcrypt::verify(password, &user.password_hash).unwrap_or(false);
    if !valid {
        return Err(FleetError::Unauthorized("invalid credentials".to_string()));
    }

    let key = create_key(&user.id.to_string(), KeyRole::Admin, secret)?;
    api_key_service::insert_key(db, ApiKeyOwner::Admin, user.id, &key, Utc::now()).await?;
    info!(user_id = %user.id, "Admin key issued.");
    Ok(key)
}

/// Resolves an admin key to its user. The key must decode, be on record and unexpired.
pub async fn authenticate_admin(
    db: &DatabaseConnection,
    key: &str,
    secret: &str,
) -> Result<user::Model, FleetError> {
    let claims = decode_key(key, secret)?;
    if claims.role != KeyRole::Admin {
        return Err(FleetError::Unauthorized("not an admin key".to_string()));
    }

    let record = api_key_service::find_by_key(db, key)
        .await?
        .filter(|k| k.owner_type == ApiKeyOwner::Admin && k.is_active_at(Utc::now()))
        .ok_or_else(|| FleetError::Unauthorized("key revoked".to_string()))?;

    user_service::get_user_by_id(db, record.owner_id)
        .await?
        .filter(|u| u.role == UserRole::Admin)
        .ok_or_else(|| FleetError::Unauthorized("no such admin".to_string()))
}

/// Checks that `key` is an unrevoked server key issued to `host_id`.
pub async fn authenticate_server(
    db: &DatabaseConnection,
    host_id: Uuid,
    key: &str,
    secret: &str,
) -> Result<(), FleetError> {
    let claims = decode_key(key, secret)?;
    if claims.role != KeyRole::Server || claims.sub != host_id.to_string() {
        return Err(FleetError::Unauthorized("key not issued to this host".to_string()));
    }

    api_key_service::find_by_key(db, key)
        .await?
        .filter(|k| k.owner_type == ApiKeyOwner::Server && k.owner_id == host_id && k.is_active_at(Utc::now()))
        .map(|_| ())
        .ok_or_else(|| FleetError::Unauthorized("key revoked".to_string()))
}

/// Creates the configured admin account on first start. Returns true if an account was created.
pub async fn bootstrap_default_admin(
    db: &DatabaseConnection,
    email: &str,
    password: &str,
) -> Result<bool, FleetError> {
    if user_service::get_user_by_email(db, email).await?.is_some() {
        return Ok(false);
    }
    let password_hash = hash_password(password)?;
    user_service::create_user(db, email, "admin", &password_hash, UserRole::Admin).await?;
    info!(email = %email, "Default admin account created.");
    Ok(true)
}
