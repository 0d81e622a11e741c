//! User accounts, attempts and stored results
//!
//! Users live in the users table keyed by `email`. Purchased attempts and the
//! Stripe sessions already credited sit on the user row; assessment results
//! sit in one assessments row per user, keyed by `user_id` (the email).

use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cache::{CacheError, KeyTtl, MockCache};
use crate::db::{DataStore, Item, TableError};
use crate::services::assessment::{AssessmentResult, AssessmentType};

/// Failed logins tolerated per email inside the lockout window
pub const MAX_LOGIN_FAILURES: i64 = 5;

pub const LOCKOUT_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("An account with this email already exists")]
    EmailTaken,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Too many failed login attempts; try again in {retry_after_secs} seconds")]
    Locked { retry_after_secs: u64 },

    #[error("User not found")]
    UserNotFound,

    #[error("No {0} attempts remaining")]
    NoAttempts(AssessmentType),

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Registration input, already validated
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub gdpr_consent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    email: String,
    password_hash: String,
    full_name: String,
    created_at: String,
    #[serde(default)]
    assessment_attempts: BTreeMap<String, u32>,
    #[serde(default)]
    processed_checkouts: Vec<String>,
    #[serde(default)]
    gdpr_consent: bool,
}

/// A user as shown to the user; never carries the password hash
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserProfile {
    pub email: String,
    pub full_name: String,
    pub created_at: String,
    pub assessment_attempts: BTreeMap<String, u32>,
    pub gdpr_consent: bool,
}

impl From<UserRecord> for UserProfile {
    fn from(record: UserRecord) -> Self {
        Self {
            email: record.email,
            full_name: record.full_name,
            created_at: record.created_at,
            assessment_attempts: record.assessment_attempts,
            gdpr_consent: record.gdpr_consent,
        }
    }
}

impl UserProfile {
    pub fn attempts(&self, assessment_type: AssessmentType) -> u32 {
        self.assessment_attempts
            .get(assessment_type.as_str())
            .copied()
            .unwrap_or(0)
    }
}

pub struct AccountService {
    store: DataStore,
    cache: Arc<MockCache>,
    bcrypt_cost: u32,
}

impl AccountService {
    pub fn new(store: DataStore, cache: Arc<MockCache>, bcrypt_cost: u32) -> Self {
        Self {
            store,
            cache,
            bcrypt_cost,
        }
    }

    pub async fn register(&self, new_user: NewUser) -> Result<UserProfile, AccountError> {
        let email = normalize_email(&new_user.email);
        if self.store.users.get_item(&email).await?.is_some() {
            return Err(AccountError::EmailTaken);
        }

        let password_hash = hash_password(new_user.password, self.bcrypt_cost).await?;
        let record = UserRecord {
            email: email.clone(),
            password_hash,
            full_name: new_user.full_name.trim().to_string(),
            created_at: Utc::now().to_rfc3339(),
            assessment_attempts: AssessmentType::ALL
                .iter()
                .map(|t| (t.as_str().to_string(), 0))
                .collect(),
            processed_checkouts: Vec::new(),
            gdpr_consent: new_user.gdpr_consent,
        };

        if !self.store.users.insert_item(to_item(&record)?).await? {
            return Err(AccountError::EmailTaken);
        }
        tracing::info!(user = %crate::utils::mask_email(&email), "User registered");

        Ok(record.into())
    }

    /// Check credentials. Returns the normalized email on success.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<String, AccountError> {
        let email = normalize_email(email);
        let failures_key = failures_key(&email);

        if let Some(failures) = self.cache.get(&failures_key).and_then(|v| v.parse::<i64>().ok()) {
            if failures >= MAX_LOGIN_FAILURES {
                let retry_after_secs = match self.cache.ttl(&failures_key) {
                    KeyTtl::Expires(remaining) => remaining.as_secs().max(1),
                    _ => LOCKOUT_WINDOW.as_secs(),
                };
                return Err(AccountError::Locked { retry_after_secs });
            }
        }

        let verified = match self.find(&email).await? {
            Some(record) => verify_password(password.to_string(), record.password_hash).await?,
            None => false,
        };

        if !verified {
            let failures = self.cache.incr(&failures_key, Some(LOCKOUT_WINDOW))?;
            tracing::warn!(user = %crate::utils::mask_email(&email), failures, "Failed login");
            return Err(AccountError::InvalidCredentials);
        }

        self.cache.delete(&failures_key);
        Ok(email)
    }

    pub async fn profile(&self, email: &str) -> Result<UserProfile, AccountError> {
        Ok(self.require(email).await?.into())
    }

    pub async fn has_attempt(&self, email: &str, assessment_type: AssessmentType) -> Result<bool, AccountError> {
        Ok(self.profile(email).await?.attempts(assessment_type) > 0)
    }

    /// Use one attempt. Returns the attempts left afterwards.
    pub async fn consume_attempt(&self, email: &str, assessment_type: AssessmentType) -> Result<u32, AccountError> {
        let mut record = self.require(email).await?;
        let remaining = record
            .assessment_attempts
            .entry(assessment_type.as_str().to_string())
            .or_insert(0);

        if *remaining == 0 {
            return Err(AccountError::NoAttempts(assessment_type));
        }
        *remaining -= 1;
        let left = *remaining;

        self.update_user(&record.email, json!({ "assessment_attempts": record.assessment_attempts }))
            .await?;
        Ok(left)
    }

    /// Credit a paid checkout once. Returns `false` when the session was
    /// already credited.
    pub async fn credit_purchase(
        &self,
        email: &str,
        checkout_session_id: &str,
        assessment_type: AssessmentType,
        attempts: u32,
    ) -> Result<bool, AccountError> {
        let mut record = self.require(email).await?;
        if record
            .processed_checkouts
            .iter()
            .any(|id| id == checkout_session_id)
        {
            return Ok(false);
        }

        *record
            .assessment_attempts
            .entry(assessment_type.as_str().to_string())
            .or_insert(0) += attempts;
        record.processed_checkouts.push(checkout_session_id.to_string());

        self.update_user(
            &record.email,
            json!({
                "assessment_attempts": record.assessment_attempts,
                "processed_checkouts": record.processed_checkouts,
            }),
        )
        .await?;

        tracing::info!(
            user = %crate::utils::mask_email(&record.email),
            %assessment_type,
            attempts,
            "Purchase credited"
        );
        Ok(true)
    }

    /// Append a result to the user's assessments row
    pub async fn record_result(&self, email: &str, result: &AssessmentResult) -> Result<(), AccountError> {
        let mut results = self.results(email).await?;
        results.push(result.clone());
        let results = serde_json::to_value(&results).map_err(|e| AccountError::Corrupt(e.to_string()))?;

        let table = &self.store.assessments;
        let mut updates = Item::new();
        updates.insert("results".to_string(), results.clone());

        if !table.update_item(email, updates).await? {
            let row = json!({ "user_id": email, "results": results });
            table.put_item(to_item(&row)?).await?;
        }
        Ok(())
    }

    /// Stored results, oldest first
    pub async fn results(&self, email: &str) -> Result<Vec<AssessmentResult>, AccountError> {
        let Some(row) = self.store.assessments.get_item(email).await? else {
            return Ok(Vec::new());
        };
        match row.get("results") {
            Some(results) => from_value(results.clone()),
            None => Ok(Vec::new()),
        }
    }

    /// Everything stored about a user, minus the password hash
    pub async fn export_data(&self, email: &str) -> Result<Value, AccountError> {
        let record = self.require(email).await?;
        let results = self.results(email).await?;
        Ok(json!({
            "profile": UserProfile::from(record.clone()),
            "processed_checkouts": record.processed_checkouts,
            "assessments": results,
            "exported_at": Utc::now().to_rfc3339(),
        }))
    }

    /// Remove the user row, the assessments row and login counters
    pub async fn delete_account(&self, email: &str) -> Result<(), AccountError> {
        if !self.store.users.delete_item(email).await? {
            return Err(AccountError::UserNotFound);
        }
        self.store.assessments.delete_item(email).await?;
        self.cache.delete(&failures_key(email));

        tracing::info!(user = %crate::utils::mask_email(email), "Account deleted");
        Ok(())
    }

    async fn find(&self, email: &str) -> Result<Option<UserRecord>, AccountError> {
        match self.store.users.get_item(email).await? {
            Some(item) => Ok(Some(from_value(Value::Object(item))?)),
            None => Ok(None),
        }
    }

    async fn require(&self, email: &str) -> Result<UserRecord, AccountError> {
        self.find(email).await?.ok_or(AccountError::UserNotFound)
    }

    async fn update_user(&self, email: &str, updates: Value) -> Result<(), AccountError> {
        if !self.store.users.update_item(email, to_item(&updates)?).await? {
            return Err(AccountError::UserNotFound);
        }
        Ok(())
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn failures_key(email: &str) -> String {
    format!("login_failures:{}", email)
}

fn to_item<T: Serialize>(value: &T) -> Result<Item, AccountError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(AccountError::Corrupt(format!("expected an object, got {}", other))),
        Err(e) => Err(AccountError::Corrupt(e.to_string())),
    }
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, AccountError> {
    serde_json::from_value(value).map_err(|e| AccountError::Corrupt(e.to_string()))
}

async fn hash_password(password: String, cost: u32) -> Result<String, AccountError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AccountError::Hashing(e.to_string()))?
        .map_err(|e| AccountError::Hashing(e.to_string()))
}

async fn verify_password(password: String, hash: String) -> Result<bool, AccountError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AccountError::Hashing(e.to_string()))?
        .map_err(|e| AccountError::Hashing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::db::ManualClock;

    fn accounts() -> (AccountService, Arc<ManualClock>) {
        let clock = ManualClock::at(1_700_000_000.0);
        let settings = Settings {
            mock_row_max_age_seconds: 0,
            ..Settings::default()
        };
        let store = DataStore::in_memory(&settings, clock.clone());
        let cache = Arc::new(MockCache::with_clock(clock.clone()));
        (AccountService::new(store, cache, 4), clock)
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password: "correct horse battery".to_string(),
            full_name: " Sam Lee ".to_string(),
            gdpr_consent: true,
        }
    }

    #[tokio::test]
    async fn test_register_and_authenticate() {
        let (accounts, _) = accounts();
        let profile = accounts.register(new_user("Sam@Example.com ")).await.unwrap();

        assert_eq!(profile.email, "sam@example.com");
        assert_eq!(profile.full_name, "Sam Lee");
        assert_eq!(profile.attempts(AssessmentType::AcademicWriting), 0);
        assert_eq!(profile.assessment_attempts.len(), 4);

        let email = accounts
            .authenticate("SAM@example.com", "correct horse battery")
            .await
            .unwrap();
        assert_eq!(email, "sam@example.com");
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let (accounts, _) = accounts();
        accounts.register(new_user("a@example.com")).await.unwrap();
        assert!(matches!(
            accounts.register(new_user("A@example.com")).await,
            Err(AccountError::EmailTaken)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_registration_keeps_first_row() {
        let (accounts, _) = accounts();
        let (first, second) = tokio::join!(
            accounts.register(new_user("a@example.com")),
            accounts.register(new_user("a@example.com")),
        );
        assert_eq!(
            [&first, &second].iter().filter(|r| r.is_ok()).count(),
            1,
            "exactly one registration wins"
        );
        assert!(matches!(
            first.err().or(second.err()),
            Some(AccountError::EmailTaken)
        ));

        accounts
            .credit_purchase("a@example.com", "cs_1", AssessmentType::AcademicWriting, 4)
            .await
            .unwrap();
        assert!(matches!(
            accounts.register(new_user("a@example.com")).await,
            Err(AccountError::EmailTaken)
        ));
        let profile = accounts.profile("a@example.com").await.unwrap();
        assert_eq!(profile.attempts(AssessmentType::AcademicWriting), 4);
    }

    #[tokio::test]
    async fn test_lockout_after_repeated_failures() {
        let (accounts, clock) = accounts();
        accounts.register(new_user("a@example.com")).await.unwrap();

        for _ in 0..MAX_LOGIN_FAILURES {
            assert!(matches!(
                accounts.authenticate("a@example.com", "wrong").await,
                Err(AccountError::InvalidCredentials)
            ));
        }

        let err = accounts
            .authenticate("a@example.com", "correct horse battery")
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::Locked { retry_after_secs: 900 }));

        clock.advance(LOCKOUT_WINDOW.as_secs_f64());
        assert!(accounts
            .authenticate("a@example.com", "correct horse battery")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unknown_user_counts_as_failure() {
        let (accounts, _) = accounts();
        assert!(matches!(
            accounts.authenticate("ghost@example.com", "x").await,
            Err(AccountError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_purchase_credit_is_idempotent() {
        let (accounts, _) = accounts();
        accounts.register(new_user("a@example.com")).await.unwrap();

        assert!(accounts
            .credit_purchase("a@example.com", "cs_1", AssessmentType::GeneralWriting, 4)
            .await
            .unwrap());
        assert!(!accounts
            .credit_purchase("a@example.com", "cs_1", AssessmentType::GeneralWriting, 4)
            .await
            .unwrap());

        let profile = accounts.profile("a@example.com").await.unwrap();
        assert_eq!(profile.attempts(AssessmentType::GeneralWriting), 4);
    }

    #[tokio::test]
    async fn test_consume_attempt() {
        let (accounts, _) = accounts();
        accounts.register(new_user("a@example.com")).await.unwrap();

        assert!(matches!(
            accounts
                .consume_attempt("a@example.com", AssessmentType::AcademicSpeaking)
                .await,
            Err(AccountError::NoAttempts(AssessmentType::AcademicSpeaking))
        ));

        accounts
            .credit_purchase("a@example.com", "cs_1", AssessmentType::AcademicSpeaking, 4)
            .await
            .unwrap();
        let left = accounts
            .consume_attempt("a@example.com", AssessmentType::AcademicSpeaking)
            .await
            .unwrap();
        assert_eq!(left, 3);
        assert!(accounts
            .has_attempt("a@example.com", AssessmentType::AcademicSpeaking)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_results_are_appended() {
        let (accounts, _) = accounts();
        accounts.register(new_user("a@example.com")).await.unwrap();

        let first = AssessmentResult::fallback(AssessmentType::AcademicWriting, "later");
        let second = AssessmentResult::fallback(AssessmentType::GeneralSpeaking, "later");
        accounts.record_result("a@example.com", &first).await.unwrap();
        accounts.record_result("a@example.com", &second).await.unwrap();

        let results = accounts.results("a@example.com").await.unwrap();
        assert_eq!(results, vec![first, second]);
    }

    #[tokio::test]
    async fn test_export_omits_password_hash() {
        let (accounts, _) = accounts();
        accounts.register(new_user("a@example.com")).await.unwrap();

        let export = accounts.export_data("a@example.com").await.unwrap();
        assert_eq!(export["profile"]["email"], "a@example.com");
        assert!(!export.to_string().contains("password_hash"));
    }

    #[tokio::test]
    async fn test_delete_account() {
        let (accounts, _) = accounts();
        accounts.register(new_user("a@example.com")).await.unwrap();
        accounts
            .record_result(
                "a@example.com",
                &AssessmentResult::fallback(AssessmentType::AcademicWriting, "x"),
            )
            .await
            .unwrap();

        accounts.delete_account("a@example.com").await.unwrap();
        assert!(matches!(
            accounts.profile("a@example.com").await,
            Err(AccountError::UserNotFound)
        ));
        assert!(accounts.results("a@example.com").await.unwrap().is_empty());
        assert!(matches!(
            accounts.delete_account("a@example.com").await,
            Err(AccountError::UserNotFound)
        ));
    }
}
