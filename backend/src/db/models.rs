use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub password_hash: String,
    pub salt: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    /// Opaque JSON text; the backend never interprets it.
    pub demographics: String,
    pub created_at: DateTime<Utc>,
}

/// Durable record of one inference call, written by the diagnosis service
/// after the response has already been produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub disease_key: String,
    pub label: String,
    pub probs: serde_json::Value,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: String, name: String, password_hash: String, salt: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            name,
            role: "clinician".to_string(),
            password_hash,
            salt,
            created_at: now,
            updated_at: now,
            last_login: None,
            is_active: true,
        }
    }

}

impl Patient {
    pub fn new(name: String, demographics: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            demographics,
            created_at: Utc::now(),
        }
    }
}

impl DiagnosisRecord {
    pub fn new(
        id: Uuid,
        patient_id: Uuid,
        disease_key: String,
        label: String,
        probs: serde_json::Value,
        model_version: String,
    ) -> Self {
        Self {
            id,
            patient_id,
            disease_key,
            label,
            probs,
            model_version,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_starts_active_with_clinician_role() {
        let user = User::new(
            "a@b.example".into(),
            "Ada".into(),
            "hash".into(),
            "salt".into(),
        );
        assert!(user.is_active);
        assert_eq!(user.role, "clinician");
        assert!(user.last_login.is_none());
    }
}
