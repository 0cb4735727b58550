use anyhow::Context;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::error::ApiError;
use crate::middlewares::auth::{JwtClaims, JwtService};
use crate::models::user::{AuthResponse, LoginRequest, RegisterRequest, User};
use crate::store::UserStore;

/// Wrong guesses allowed before an account locks.
const MAX_LOGIN_ATTEMPTS: i32 = 5;
/// How long a locked account stays locked.
const LOCK_HOURS: i64 = 2;

/// Instructor registration and login. Registration is gated by the shared
/// master code; passwords are stored as bcrypt hashes only.
pub struct AuthService {
    users: Arc<dyn UserStore>,
    jwt_service: JwtService,
    master_code: String,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserStore>, jwt_service: JwtService, master_code: String) -> Self {
        Self {
            users,
            jwt_service,
            master_code,
        }
    }

    /// Hash a password using bcrypt with the default cost.
    pub fn hash_password(&self, password: &str) -> Result<String, ApiError> {
        Ok(hash(password, DEFAULT_COST).context("Failed to hash password")?)
    }

    /// Verify a password against a stored hash.
    pub fn verify_password(&self, password: &str, hashed: &str) -> Result<bool, ApiError> {
        Ok(verify(password, hashed).context("Failed to verify password")?)
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<AuthResponse, ApiError> {
        if req.master_code != self.master_code {
            return Err(ApiError::Authentication("Invalid master code".to_string()));
        }

        let username = req.username.trim().to_lowercase();
        let email = req.email.trim().to_lowercase();

        if self.users.find_by_username(&username).await?.is_some() {
            return Err(ApiError::Conflict("Username already exists".to_string()));
        }
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(ApiError::Conflict("Email already exists".to_string()));
        }

        let password_hash = self.hash_password(&req.password)?;
        let now = Utc::now();
        let user = User::new(username, password_hash, req.name, email, now);
        self.users.insert(&user).await?;

        tracing::info!(user_id = %user.id.to_hex(), "instructor registered");

        let token = self.issue_token(&user, now)?;
        Ok(AuthResponse {
            success: true,
            token,
            user: user.into(),
        })
    }

    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse, ApiError> {
        let now = Utc::now();
        let username = req.username.trim().to_lowercase();

        let user = self
            .users
            .find_by_username(&username)
            .await?
            .ok_or_else(|| {
                ApiError::Authentication("Invalid username or password".to_string())
            })?;

        if user.is_locked(now) {
            return Err(ApiError::Authentication(
                "Account is temporarily locked. Try again later.".to_string(),
            ));
        }
        if !user.is_active {
            return Err(ApiError::Authentication("Account is inactive".to_string()));
        }

        if !self.verify_password(&req.password, &user.password_hash)? {
            // A lock that already ran out restarts the count at one.
            let attempts = if user.lock_until.is_some_and(|until| until <= now) {
                1
            } else {
                user.login_attempts + 1
            };
            let lock_until =
                (attempts >= MAX_LOGIN_ATTEMPTS).then(|| now + Duration::hours(LOCK_HOURS));

            self.users
                .record_login_failure(user.id, attempts, lock_until)
                .await?;

            tracing::warn!(username = %user.username, attempts, "failed login attempt");
            return Err(ApiError::Authentication(
                "Invalid username or password".to_string(),
            ));
        }

        self.users.record_login_success(user.id, now).await?;
        tracing::info!(user_id = %user.id.to_hex(), "successful login");

        let token = self.issue_token(&user, now)?;
        Ok(AuthResponse {
            success: true,
            token,
            user: user.into(),
        })
    }

    fn issue_token(&self, user: &User, now: DateTime<Utc>) -> Result<String, ApiError> {
        // Long enough for a full teaching day.
        let ttl_seconds = std::env::var("JWT_ACCESS_TOKEN_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(28800);

        let claims = JwtClaims {
            sub: user.id.to_hex(),
            role: user.role.as_str().to_string(),
            exp: (now + Duration::seconds(ttl_seconds)).timestamp() as usize,
            iat: now.timestamp() as usize,
        };
        self.jwt_service
            .generate_token(claims)
            .map_err(|e| ApiError::Internal(anyhow::anyhow!(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryUserStore;

    fn service() -> AuthService {
        AuthService::new(
            Arc::new(MemoryUserStore::new()),
            JwtService::new("test-secret"),
            "MASTER123".to_string(),
        )
    }

    fn register_request(username: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            password: "CorrectHorse9!".to_string(),
            name: "Prof Singh".to_string(),
            email: format!("{}@example.edu", username),
            master_code: "MASTER123".to_string(),
        }
    }

    #[tokio::test]
    async fn register_requires_the_master_code() {
        let service = service();
        let mut req = register_request("prof_singh");
        req.master_code = "WRONG".to_string();

        let err = service.register(req).await.unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
    }

    #[tokio::test]
    async fn passwords_are_stored_hashed_and_verified() {
        let service = service();
        service.register(register_request("prof_singh")).await.unwrap();

        let stored = service
            .users
            .find_by_username("prof_singh")
            .await
            .unwrap()
            .unwrap();
        assert_ne!(stored.password_hash, "CorrectHorse9!");
        assert!(service
            .verify_password("CorrectHorse9!", &stored.password_hash)
            .unwrap());

        let ok = service
            .login(LoginRequest {
                username: "prof_singh".to_string(),
                password: "CorrectHorse9!".to_string(),
            })
            .await
            .unwrap();
        assert!(ok.success);
        assert!(!ok.token.is_empty());
    }

    #[tokio::test]
    async fn five_bad_passwords_lock_the_account() {
        let service = service();
        service.register(register_request("prof_singh")).await.unwrap();

        for _ in 0..5 {
            let err = service
                .login(LoginRequest {
                    username: "prof_singh".to_string(),
                    password: "wrong-password".to_string(),
                })
                .await
                .unwrap_err();
            assert!(matches!(err, ApiError::Authentication(_)));
        }

        // Even the right password is refused while locked.
        let err = service
            .login(LoginRequest {
                username: "prof_singh".to_string(),
                password: "CorrectHorse9!".to_string(),
            })
            .await
            .unwrap_err();
        match err {
            ApiError::Authentication(message) => assert!(message.contains("locked")),
            other => panic!("expected lock, got {:?}", other),
        }
    }
}
