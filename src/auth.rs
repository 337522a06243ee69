//! Session Provider boundary. Tokens are HS256 JWTs whose subject is the
//! profile id; administrative rights come from the `roles` claim.

use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};

use crate::models::Id;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Id,
    pub exp: usize,
    #[serde(default)]
    pub roles: Vec<Role>,
}

fn jwt_secret() -> Result<String, jsonwebtoken::errors::Error> {
    env::var("JWT_SECRET").map_err(|_| ErrorKind::InvalidKeyFormat.into())
}

/// Validate a JWT and return its claims.
pub fn decode_jwt(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let secret = jwt_secret()?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

/// Extractor yielding validated `Claims`.
pub struct Auth(pub Claims);

impl Auth {
    pub fn user_id(&self) -> Id {
        self.0.sub
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.0.roles.contains(&role)
    }
}

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            return match decode_jwt(bearer.token()) {
                Ok(claims) => ready(Ok(Auth(claims))),
                Err(e) => {
                    tracing::debug!(error = %e, "rejected token");
                    ready(Err(actix_web::error::ErrorUnauthorized("Invalid JWT")))
                }
            };
        }
        ready(Err(actix_web::error::ErrorUnauthorized("Authorization required")))
    }
}

/// Optional variant for endpoints that also serve signed-out visitors.
pub struct MaybeAuth(pub Option<Claims>);

impl FromRequest for MaybeAuth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let claims = BearerAuth::from_request(req, pl)
            .into_inner()
            .ok()
            .and_then(|bearer| decode_jwt(bearer.token()).ok());
        ready(Ok(MaybeAuth(claims)))
    }
}

/// Role guard for handlers returning `Result<_, ApiError>`.
#[macro_export]
macro_rules! require_role {
    ($auth:expr, $role:pat) => {
        if !$auth.0.roles.iter().any(|r| matches!(r, $role)) {
            return Err($crate::error::ApiError::Forbidden);
        }
    };
}

/// Issues a token for `user_id` valid for `ttl_hours`.
pub fn create_jwt(user_id: Id, roles: Vec<Role>, ttl_hours: i64) -> Result<String, jsonwebtoken::errors::Error> {
    let secret = jwt_secret()?;
    let exp = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::hours(ttl_hours))
        .ok_or(ErrorKind::ExpiredSignature)?
        .timestamp() as usize;
    let claims = Claims { sub: user_id, exp, roles };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}
