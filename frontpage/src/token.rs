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

//! # tokens
//!
//! Signed, limited-duration bearer tokens for the frontpage API: JWTs signed HMAC-SHA256. Claims
//! are `sub` (the username), `iss` (this instance's configured origin), `iat`/`exp`, and a random
//! `jti`. Validation checks the signature, the issuer & the expiry; there is no revocation list--
//! the short lifetime is the revocation story.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jwt::{SignWithKey, VerifyWithKey};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::Sha256;
use snafu::{Backtrace, ResultExt, Snafu};
use uuid::Uuid;

use crate::users::Username;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("The signing key was not valid hex: {source}"))]
    BadHex {
        source: hex::FromHexError,
        backtrace: Backtrace,
    },
    #[snafu(display("The signing key was rejected: {source}"))]
    BadKey {
        source: hmac::digest::InvalidLength,
        backtrace: Backtrace,
    },
    #[snafu(display("The token expired at {expired_at} (Unix seconds)"))]
    Expired { expired_at: i64 },
    #[snafu(display("Failed to sign a token: {source}"))]
    Sign { source: jwt::Error },
    #[snafu(display("The token's subject is not a valid username: {source}"))]
    Subject {
        #[snafu(source(from(crate::users::Error, Box::new)))]
        source: Box<crate::users::Error>,
    },
    #[snafu(display("Failed to verify a token: {source}"))]
    Verify { source: jwt::Error },
    #[snafu(display("The token was issued by {issuer}, not this instance"))]
    WrongIssuer { issuer: String },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          SigningKey                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The HMAC-SHA256 key with which this instance signs its tokens
///
/// Configured as a hex string; [SigningKey::random] backs the default configuration so an
/// unconfigured instance still works (its tokens just don't survive a restart).
#[derive(Clone)]
pub struct SigningKey(Hmac<Sha256>);

impl SigningKey {
    pub fn from_hex(text: &str) -> Result<SigningKey> {
        let bytes = hex::decode(text).context(BadHexSnafu)?;
        Hmac::new_from_slice(&bytes)
            .context(BadKeySnafu)
            .map(SigningKey)
    }
    pub fn random() -> SigningKey {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        SigningKey(Hmac::new_from_slice(&bytes).unwrap(/* known good: HMAC accepts any key length */))
    }
}

// Hand-written so as not to write key material into logs.
impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKey(..)")
    }
}

impl<'de> Deserialize<'de> for SigningKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        SigningKey::from_hex(&text)
            .map_err(|err| <D::Error as serde::de::Error>::custom(format!("{}", err)))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            tokens                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Registered [claims] carried by a frontpage token
///
/// [claims]: https://datatracker.ietf.org/doc/html/rfc7519#section-4.1
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Mint a token for `username`, good for `lifetime`; returns the token text & its expiry
pub fn mint_token(
    key: &SigningKey,
    issuer: &str,
    username: &Username,
    lifetime: Duration,
) -> Result<(String, DateTime<Utc>)> {
    let now = Utc::now();
    let expires = now + lifetime;
    let claims = Claims {
        sub: username.to_string(),
        iss: issuer.to_owned(),
        iat: now.timestamp(),
        exp: expires.timestamp(),
        jti: Uuid::new_v4().to_string(),
    };
    let token = claims.sign_with_key(&key.0).context(SignSnafu)?;
    Ok((token, expires))
}

/// Validate `token` & return the username it vouches for
pub fn check_token(key: &SigningKey, issuer: &str, token: &str) -> Result<Username> {
    let claims: Claims = token.verify_with_key(&key.0).context(VerifySnafu)?;
    if claims.iss != issuer {
        return WrongIssuerSnafu { issuer: claims.iss }.fail();
    }
    if claims.exp <= Utc::now().timestamp() {
        return ExpiredSnafu {
            expired_at: claims.exp,
        }
        .fail();
    }
    claims.sub.parse::<Username>().context(SubjectSnafu)
}

#[cfg(test)]
mod test {

    use super::*;

    fn username() -> Username {
        "wopr".parse().unwrap()
    }

    #[test]
    fn tokens_round_trip() {
        let key = SigningKey::random();
        let (token, expires) = mint_token(
            &key,
            "https://frontpage.example.com",
            &username(),
            Duration::hours(12),
        )
        .unwrap();
        assert!(expires > Utc::now());
        let subject = check_token(&key, "https://frontpage.example.com", &token).unwrap();
        assert_eq!(subject, username());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let key = SigningKey::random();
        let (token, _) = mint_token(
            &key,
            "https://frontpage.example.com",
            &username(),
            Duration::seconds(-1),
        )
        .unwrap();
        assert!(matches!(
            check_token(&key, "https://frontpage.example.com", &token),
            Err(Error::Expired { .. })
        ));
    }

    #[test]
    fn foreign_signatures_are_rejected() {
        let (token, _) = mint_token(
            &SigningKey::random(),
            "https://frontpage.example.com",
            &username(),
            Duration::hours(1),
        )
        .unwrap();
        assert!(matches!(
            check_token(&SigningKey::random(), "https://frontpage.example.com", &token),
            Err(Error::Verify { .. })
        ));
    }

    #[test]
    fn foreign_issuers_are_rejected() {
        let key = SigningKey::random();
        let (token, _) = mint_token(&key, "https://elsewhere.example.com", &username(), Duration::hours(1))
            .unwrap();
        assert!(matches!(
            check_token(&key, "https://frontpage.example.com", &token),
            Err(Error::WrongIssuer { .. })
        ));
    }

    #[test]
    fn keys_parse_from_hex() {
        assert!(SigningKey::from_hex("00010203040506070809").is_ok());
        assert!(SigningKey::from_hex("not hex").is_err());
    }
}
