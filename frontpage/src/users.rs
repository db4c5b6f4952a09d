// Copyright (C) 2025 The frontpage developers <frontpage-devs@example.com>
//
// This file is part of frontpage.
//
// frontpage is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// frontpage is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with frontpage.  If not,
// see <http://www.gnu.org/licenses/>.

//! # User API
//!
//! Sign-up, login, and the bearer-token middleware protecting the stories API.
//!
//! Passwords are hashed with argon2id; the configured [Pepper] goes in as the argon2 secret, so a
//! stolen user table alone isn't crackable offline. What's stored per user is the PHC string,
//! nothing else. Logins mint the signed, limited-duration tokens of [token](crate::token).

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use lazy_static::lazy_static;
use rand::RngCore;
use regex::Regex;
use secrecy::{ExposeSecret, SecretSlice, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{prelude::*, Backtrace};
use tracing::debug;
use uuid::Uuid;

use crate::{
    frontpage::Frontpage,
    http::ErrorResponseBody,
    storage,
    token::{check_token, mint_token},
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to add user: {source}"))]
    AddUser { source: storage::Error },
    #[snafu(display("An Authorization header had a non-textual value"))]
    BadAuthHeaderValue { backtrace: Backtrace },
    #[snafu(display("Incorrect password for {username}"))]
    BadPassword {
        username: Username,
        backtrace: Backtrace,
    },
    #[snafu(display("{name} is not a valid frontpage username"))]
    BadUsername { name: String },
    #[snafu(display("{username} is already taken"))]
    DuplicateUser { username: Username },
    #[snafu(display("Couldn't hash a password: {source}"))]
    Hash {
        source: argon2::password_hash::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Invalid credentials: {source}"))]
    InvalidCredentials { source: crate::token::Error },
    #[snafu(display("Multiple Authorization headers were supplied; only one is accepted."))]
    MultipleAuthnHeaders,
    #[snafu(display("No authorization token found"))]
    NoAuthToken { backtrace: Backtrace },
    #[snafu(display("The pepper was rejected by argon2: {source}"))]
    Pepper {
        source: argon2::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to mint a token for user {username}: {source}"))]
    Token {
        username: Username,
        #[snafu(source(from(crate::token::Error, Box::new)))]
        source: Box<crate::token::Error>,
    },
    #[snafu(display("Unknown username {username}"))]
    UnknownUser { username: Username },
    #[snafu(display("Authorization scheme not supported; use Bearer"))]
    UnsupportedAuthScheme { backtrace: Backtrace },
    #[snafu(display("Failed to lookup user {username}: {source}"))]
    User {
        username: Username,
        source: storage::Error,
    },
}

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            ////////////////////////////////////////////////////////////////////////////////////////
            // Broken requests-- tell the caller how to fix it
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::BadUsername { name } => (
                StatusCode::BAD_REQUEST,
                format!("{} is not a valid username", name),
            ),
            Error::DuplicateUser { username } => (
                StatusCode::CONFLICT,
                format!("{} is already taken", username),
            ),
            ////////////////////////////////////////////////////////////////////////////////////////
            // Authorization failure-- don't tell a potential attacker the way in which they failed
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::BadAuthHeaderValue { .. }
            | Error::BadPassword { .. }
            | Error::InvalidCredentials { .. }
            | Error::MultipleAuthnHeaders
            | Error::NoAuthToken { .. }
            | Error::UnknownUser { .. }
            | Error::UnsupportedAuthScheme { .. } => {
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            ////////////////////////////////////////////////////////////////////////////////////////
            // Internal failure-- own up to it:
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::AddUser { source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to add user: {}", source),
            ),
            Error::Hash { source, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Couldn't hash password: {}", source),
            ),
            Error::Pepper { source, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Bad pepper: {}", source),
            ),
            Error::Token {
                username, source, ..
            } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to mint a token for {}: {}", username, source),
            ),
            Error::User { username, source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal server error looking-up user {}: {}", username, source),
            ),
        }
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (code, msg) = self.as_status_and_msg();
        (code, Json(ErrorResponseBody { error: msg })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Username                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

lazy_static! {
    static ref USERNAME_RE: Regex = Regex::new("^[a-z][a-z0-9_-]{2,31}$").unwrap(/* known good */);
}

/// A refinement of [String]: three to thirty-two characters of `[a-z0-9_-]`, starting with a
/// letter
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Username(String);

impl std::str::FromStr for Username {
    type Err = Error;
    fn from_str(text: &str) -> Result<Username> {
        if USERNAME_RE.is_match(text) {
            Ok(Username(text.to_owned()))
        } else {
            BadUsernameSnafu { name: text }.fail()
        }
    }
}

impl std::fmt::Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for Username {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse()
            .map_err(|err| <D::Error as serde::de::Error>::custom(format!("{}", err)))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Pepper                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Site-wide secret mixed into every password hash
///
/// Configured as a hex string; the default is random, which is fine right up until the process
/// restarts & extant password hashes stop verifying-- configure one in production.
#[derive(Clone, Debug)]
pub struct Pepper(SecretSlice<u8>);

impl Pepper {
    pub fn from_hex(text: &str) -> std::result::Result<Pepper, hex::FromHexError> {
        hex::decode(text).map(|bytes| Pepper(bytes.into()))
    }
    fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

impl Default for Pepper {
    fn default() -> Self {
        let mut bytes: Vec<u8> = vec![0; 16];
        OsRng.fill_bytes(&mut bytes);
        Pepper(bytes.into())
    }
}

impl<'de> Deserialize<'de> for Pepper {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        Pepper::from_hex(&text)
            .map_err(|err| <D::Error as serde::de::Error>::custom(format!("{}", err)))
    }
}

fn hasher(pepper: &Pepper) -> Result<Argon2<'_>> {
    Argon2::new_with_secret(
        pepper.expose(),
        Algorithm::Argon2id,
        Version::V0x13,
        Params::default(),
    )
    .context(PepperSnafu)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              User                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

/// A frontpage user: an id, a name & a peppered argon2id password hash
#[derive(Clone, Debug)]
pub struct User {
    id: UserId,
    username: Username,
    pw_hash: String,
    created: DateTime<Utc>,
}

impl User {
    pub fn new(username: Username, password: &SecretString, pepper: &Pepper) -> Result<User> {
        let salt = SaltString::generate(&mut OsRng);
        let pw_hash = hasher(pepper)?
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .context(HashSnafu)?
            .to_string();
        Ok(User {
            id: UserId(Uuid::new_v4()),
            username,
            pw_hash,
            created: Utc::now(),
        })
    }
    pub fn id(&self) -> UserId {
        self.id
    }
    pub fn username(&self) -> &Username {
        &self.username
    }
    pub fn created(&self) -> &DateTime<Utc> {
        &self.created
    }
    pub fn check_password(&self, password: &SecretString, pepper: &Pepper) -> Result<()> {
        let parsed = PasswordHash::new(&self.pw_hash).context(HashSnafu)?;
        hasher(pepper)?
            .verify_password(password.expose_secret().as_bytes(), &parsed)
            .map_err(|_| {
                BadPasswordSnafu {
                    username: self.username.clone(),
                }
                .build()
            })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         Authorization                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Authenticate a request bearing one of our tokens
///
/// Axum function-based [middleware]; on success the authenticated [Username] is inserted into the
/// request's extensions for downstream handlers.
///
/// [middleware]: https://docs.rs/axum/latest/axum/middleware/fn.from_fn.html
pub async fn authenticate(
    State(state): State<Arc<Frontpage>>,
    headers: HeaderMap,
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    fn bearer(headers: &HeaderMap) -> Result<&str> {
        let value = headers
            .get_all(http::header::AUTHORIZATION)
            .into_iter()
            .at_most_one()
            .map_err(|_| Error::MultipleAuthnHeaders)?
            .context(NoAuthTokenSnafu)?;
        value
            .to_str()
            .ok()
            .context(BadAuthHeaderValueSnafu)?
            .strip_prefix("Bearer ")
            .context(UnsupportedAuthSchemeSnafu)
    }

    match bearer(&headers).and_then(|text| {
        check_token(&state.signing_key, &state.origin, text).context(InvalidCredentialsSnafu)
    }) {
        Ok(username) => {
            state.instruments.users.auth_successes.add(1, &[]);
            request.extensions_mut().insert(username);
            next.run(request).await
        }
        Err(err) => {
            state.instruments.users.auth_failures.add(1, &[]);
            debug!("Rejecting a request to {}: {err}", request.uri().path());
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     `/users/signup`, `/users/login`                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub username: Username,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires: DateTime<Utc>,
}

async fn signup(
    State(state): State<Arc<Frontpage>>,
    Json(req): Json<CredentialsRequest>,
) -> axum::response::Response {
    async fn signup1(state: &Frontpage, req: CredentialsRequest) -> Result<Username> {
        let username: Username = req.username.parse()?;
        let user = User::new(username.clone(), &req.password, &state.pepper)?;
        if state.users.add_user(&user).await.context(AddUserSnafu)? {
            Ok(username)
        } else {
            DuplicateUserSnafu { username }.fail()
        }
    }

    match signup1(&state, req).await {
        Ok(username) => {
            state.instruments.users.signups.add(1, &[]);
            (StatusCode::CREATED, Json(SignupResponse { username })).into_response()
        }
        Err(err) => err.into_response(),
    }
}

async fn login(
    State(state): State<Arc<Frontpage>>,
    Json(req): Json<CredentialsRequest>,
) -> axum::response::Response {
    async fn login1(state: &Frontpage, req: CredentialsRequest) -> Result<LoginResponse> {
        let username: Username = req.username.parse()?;
        let user = state
            .users
            .user_for_name(&username)
            .await
            .context(UserSnafu {
                username: username.clone(),
            })?
            .context(UnknownUserSnafu {
                username: username.clone(),
            })?;
        user.check_password(&req.password, &state.pepper)?;
        let (token, expires) = mint_token(
            &state.signing_key,
            &state.origin,
            user.username(),
            state.token_lifetime,
        )
        .context(TokenSnafu { username })?;
        Ok(LoginResponse { token, expires })
    }

    match login1(&state, req).await {
        Ok(response) => {
            state.instruments.users.logins.add(1, &[]);
            Json(response).into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// Return a router for the User API; merged into the main router by [make_router].
///
/// [make_router]: crate::http::make_router
pub fn make_router() -> Router<Arc<Frontpage>> {
    Router::new()
        .route("/users/signup", post(signup))
        .route("/users/login", post(login))
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn username_refinement() {
        assert!("wopr".parse::<Username>().is_ok());
        assert!("a-1_b".parse::<Username>().is_ok());
        assert!("ab".parse::<Username>().is_err()); // too short
        assert!("1abc".parse::<Username>().is_err()); // leading digit
        assert!("ABC".parse::<Username>().is_err()); // case
        assert!("a".repeat(33).parse::<Username>().is_err()); // too long
    }

    #[test]
    fn passwords_verify_with_the_same_pepper_only() {
        let pepper = Pepper::default();
        let user = User::new(
            "wopr".parse().unwrap(),
            &SecretString::from("joshua"),
            &pepper,
        )
        .unwrap();
        assert!(user
            .check_password(&SecretString::from("joshua"), &pepper)
            .is_ok());
        assert!(matches!(
            user.check_password(&SecretString::from("falken"), &pepper),
            Err(Error::BadPassword { .. })
        ));
        assert!(user
            .check_password(&SecretString::from("joshua"), &Pepper::default())
            .is_err());
    }
}
