use crate::config::Config;
use crate::error::{AppError, Result};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by the bearer token this service validates. The identity
/// provider that issues these tokens is an external collaborator; this
/// service only verifies signatures against a shared secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

/// Stateless JWT verifier. No register/login/password hashing here — those
/// flows live with the identity provider, not this service.
#[derive(Clone)]
pub struct AuthService {
    jwt_secret: String,
}

impl AuthService {
    pub fn new(config: &Config) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
        }
    }

    pub async fn verify_token(&self, token: &str) -> Result<Claims> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| AppError::Unauthorized)?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn service() -> AuthService {
        AuthService { jwt_secret: "x".repeat(32) }
    }

    fn claims_expiring_in(days: i64) -> Claims {
        Claims {
            sub: "user-1".to_string(),
            exp: (chrono::Utc::now() + chrono::Duration::days(days)).timestamp(),
        }
    }

    #[tokio::test]
    async fn verifies_a_token_signed_with_the_same_secret() {
        let svc = service();
        let token = encode(&Header::default(), &claims_expiring_in(1), &EncodingKey::from_secret(svc.jwt_secret.as_bytes())).unwrap();

        let verified = svc.verify_token(&token).await.unwrap();
        assert_eq!(verified.sub, "user-1");
    }

    #[tokio::test]
    async fn rejects_a_token_signed_with_a_different_secret() {
        let svc = service();
        let token = encode(&Header::default(), &claims_expiring_in(1), &EncodingKey::from_secret(b"a-completely-different-secret-32")).unwrap();

        assert!(svc.verify_token(&token).await.is_err());
    }

    #[tokio::test]
    async fn rejects_an_expired_token() {
        let svc = service();
        let token = encode(&Header::default(), &claims_expiring_in(-1), &EncodingKey::from_secret(svc.jwt_secret.as_bytes())).unwrap();

        assert!(svc.verify_token(&token).await.is_err());
    }
}
