use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{SharedUser, User};

#[derive(Debug, Error, PartialEq)]
pub enum UserStoreError {
    #[error("the user is already existed")]
    ExistedUser,
    #[error("the user does not exist")]
    NonExistentUser,
    #[error("the user's id, public key or private key is empty")]
    IncorrectValues,
    #[error("nothing to change or already changed")]
    NothingToChange,
    #[error("incorrect public or private key")]
    WrongKeys,
    #[error("invalid token: <{0}>")]
    Token(String),
    #[error("sign key is too short")]
    EmptySignKey,
    #[error("ttl hours should be more than zero")]
    InvalidTtl,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
    iat: i64,
}

/// In-memory user registry that also issues and validates access tokens.
///
/// Stored users are shared with pair subscriber lists; key updates through
/// `set_keys` become visible to the next credential snapshot.
#[derive(Debug)]
pub struct UserStorage {
    users: RwLock<HashMap<String, SharedUser>>,
    sign_key: String,
    ttl_hours: i64,
}

impl UserStorage {
    pub fn new(sign_key: impl Into<String>, ttl_hours: i64) -> Result<Self, UserStoreError> {
        let sign_key = sign_key.into();
        if sign_key.is_empty() {
            return Err(UserStoreError::EmptySignKey);
        }
        if ttl_hours <= 0 {
            return Err(UserStoreError::InvalidTtl);
        }
        Ok(UserStorage {
            users: RwLock::new(HashMap::new()),
            sign_key,
            ttl_hours,
        })
    }

    /// Adds a user. Username and both keys must be non-empty.
    pub fn add_user(&self, user: User) -> Result<(), UserStoreError> {
        if !user.has_credentials() {
            return Err(UserStoreError::IncorrectValues);
        }
        let mut users = self.users.write().unwrap();
        if users.contains_key(&user.username) {
            return Err(UserStoreError::ExistedUser);
        }
        users.insert(user.username.clone(), Arc::new(RwLock::new(user)));
        Ok(())
    }

    pub fn delete_user(&self, username: &str) -> Result<(), UserStoreError> {
        let mut users = self.users.write().unwrap();
        users
            .remove(username)
            .map(|_| ())
            .ok_or(UserStoreError::NonExistentUser)
    }

    pub fn get_user(&self, username: &str) -> Result<SharedUser, UserStoreError> {
        let users = self.users.read().unwrap();
        users
            .get(username)
            .cloned()
            .ok_or(UserStoreError::NonExistentUser)
    }

    /// Replaces a user's exchange keys.
    pub fn set_keys(&self, username: &str, public: &str, private: &str) -> Result<(), UserStoreError> {
        if username.is_empty() || public.is_empty() || private.is_empty() {
            return Err(UserStoreError::IncorrectValues);
        }
        let user = self.get_user(username)?;
        let mut user = user.write().unwrap();
        if user.public_key == public && user.private_key == private {
            return Err(UserStoreError::NothingToChange);
        }
        user.public_key = public.to_string();
        user.private_key = private.to_string();
        Ok(())
    }

    /// Issues a token for a user whose presented keys match the stored ones.
    pub fn generate_jwt(&self, candidate: &User) -> Result<String, UserStoreError> {
        let stored = self.get_user(&candidate.username)?;
        {
            let stored = stored.read().unwrap();
            if stored.public_key != candidate.public_key
                || stored.private_key != candidate.private_key
            {
                return Err(UserStoreError::WrongKeys);
            }
        }
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: candidate.username.clone(),
            exp: now + self.ttl_hours * 3600,
            iat: now,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.sign_key.as_bytes()),
        )
        .map_err(|err| UserStoreError::Token(err.to_string()))
    }

    /// Validates a token's signature and expiry, returning the username.
    pub fn parse_token(&self, token: &str) -> Result<String, UserStoreError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.sign_key.as_bytes()),
            &Validation::default(),
        )
        .map_err(|err| UserStoreError::Token(err.to_string()))?;
        Ok(data.claims.sub)
    }
}
