use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{Role, User};

pub const TEST_JWT_SECRET: &str = "test-secret-key-for-jwt-validation-must-be-long-enough";

pub struct TestConfig {
    pub jwt_secret: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: TEST_JWT_SECRET.to_string(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            jwt_secret: self.jwt_secret.clone(),
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl TestUser {
    pub fn new(role: Role) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            email: format!("{}-{}@example.com", role, id.simple()),
            role,
        }
    }

    pub fn patient() -> Self {
        Self::new(Role::Patient)
    }

    pub fn doctor() -> Self {
        Self::new(Role::Doctor)
    }

    pub fn nurse() -> Self {
        Self::new(Role::Nurse)
    }

    pub fn admin() -> Self {
        Self::new(Role::Admin)
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id,
            email: Some(self.email.clone()),
            role: self.role,
            created_at: Some(Utc::now()),
        }
    }

    /// `Authorization` header value signed with the test secret.
    pub fn bearer(&self) -> String {
        format!(
            "Bearer {}",
            JwtTestUtils::create_test_token(self, TEST_JWT_SECRET, None)
        )
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let claims = json!({
            "sub": user.id.to_string(),
            "email": user.email,
            "role": "authenticated",
            "app_metadata": { "role": user.role.to_string() },
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("test token encodes")
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }
}
