// src/auth.rs
use crate::error::AppError;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

const TOKEN_LIFETIME_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Kid,
    Parent,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

struct KidAccount {
    email: &'static str,
    password: &'static str,
    age: u8,
    name: &'static str,
}

const KID_USERS: &[KidAccount] = &[
    KidAccount {
        email: "kid6@example.com",
        password: "password6",
        age: 6,
        name: "Rohan",
    },
    KidAccount {
        email: "kid11@example.com",
        password: "password11",
        age: 11,
        name: "Tanya",
    },
    KidAccount {
        email: "kid16@example.com",
        password: "password16",
        age: 16,
        name: "Arjun",
    },
];

const PARENT_EMAIL: &str = "parent@example.com";
const PARENT_PASSWORD: &str = "password";

/// Age-appropriate section of the app a kid lands on after login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Track {
    ChillarParty,
    SmartSpenders,
    WealthBuilders,
}

impl Track {
    pub fn for_age(age: u8) -> Self {
        match age {
            0..=9 => Track::ChillarParty,
            10..=14 => Track::SmartSpenders,
            _ => Track::WealthBuilders,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Account {
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<Track>,
}

pub fn authenticate(email: &str, password: &str) -> Result<Account, AppError> {
    if email == PARENT_EMAIL && password == PARENT_PASSWORD {
        return Ok(Account {
            email: email.to_string(),
            role: Role::Parent,
            name: None,
            age: None,
            track: None,
        });
    }

    KID_USERS
        .iter()
        .find(|kid| kid.email == email && kid.password == password)
        .map(|kid| Account {
            email: kid.email.to_string(),
            role: Role::Kid,
            name: Some(kid.name.to_string()),
            age: Some(kid.age),
            track: Some(Track::for_age(kid.age)),
        })
        .ok_or(AppError::InvalidCredentials)
}

pub fn create_token(account: &Account, secret: &str) -> Result<String, AppError> {
    let claims = Claims {
        sub: account.email.clone(),
        role: account.role,
        exp: (Utc::now() + Duration::hours(TOKEN_LIFETIME_HOURS)).timestamp() as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// Resolves an `Authorization` header to the kid that owns the portfolio.
pub fn kid_from_header(header: &str, secret: &str) -> Result<String, AppError> {
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AppError::Unauthorized)?;
    let claims = verify_token(token.trim(), secret)?;
    match claims.role {
        Role::Kid => Ok(claims.sub),
        Role::Parent => Err(AppError::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn kids_are_routed_by_age() {
        assert_eq!(Track::for_age(6), Track::ChillarParty);
        assert_eq!(Track::for_age(9), Track::ChillarParty);
        assert_eq!(Track::for_age(14), Track::SmartSpenders);
        assert_eq!(Track::for_age(16), Track::WealthBuilders);

        let account = authenticate("kid11@example.com", "password11").unwrap();
        assert_eq!(account.role, Role::Kid);
        assert_eq!(account.track, Some(Track::SmartSpenders));
    }

    #[test]
    fn wrong_password_is_rejected() {
        assert!(matches!(
            authenticate("kid6@example.com", "password16"),
            Err(AppError::InvalidCredentials)
        ));
        assert!(matches!(
            authenticate("nobody@example.com", "password"),
            Err(AppError::InvalidCredentials)
        ));
    }

    #[test]
    fn kid_token_resolves_to_owner() {
        let account = authenticate("kid16@example.com", "password16").unwrap();
        let token = create_token(&account, SECRET).unwrap();

        let owner = kid_from_header(&format!("Bearer {}", token), SECRET).unwrap();
        assert_eq!(owner, "kid16@example.com");
    }

    #[test]
    fn parent_and_forged_tokens_cannot_trade() {
        let parent = authenticate("parent@example.com", "password").unwrap();
        let token = create_token(&parent, SECRET).unwrap();
        assert!(matches!(
            kid_from_header(&format!("Bearer {}", token), SECRET),
            Err(AppError::Unauthorized)
        ));

        let kid = authenticate("kid16@example.com", "password16").unwrap();
        let token = create_token(&kid, "other-secret").unwrap();
        assert!(matches!(
            kid_from_header(&format!("Bearer {}", token), SECRET),
            Err(AppError::Token(_))
        ));
        assert!(kid_from_header(&token, SECRET).is_err());
    }
}
