use std::collections::HashMap;

use aws_sdk_dynamodb::types::{AttributeValue, Select};
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{DiagnosisRecord, Patient, User};

#[derive(Clone)]
pub struct DynamoDbRepository {
    client: Client,
    users_table: String,
    patients_table: String,
    diagnoses_table: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Item not found")]
    NotFound,
    #[error("Invalid data format: {0}")]
    InvalidData(String),
}

impl DynamoDbRepository {
    pub fn new(
        client: Client,
        users_table: String,
        patients_table: String,
        diagnoses_table: String,
    ) -> Self {
        Self {
            client,
            users_table,
            patients_table,
            diagnoses_table,
        }
    }

    // User operations

    pub async fn create_user(&self, user: &User) -> Result<(), RepositoryError> {
        let mut item = HashMap::new();
        item.insert("id".to_string(), AttributeValue::S(user.id.to_string()));
        item.insert("email".to_string(), AttributeValue::S(user.email.clone()));
        item.insert("name".to_string(), AttributeValue::S(user.name.clone()));
        item.insert("user_role".to_string(), AttributeValue::S(user.role.clone()));
        item.insert(
            "password_hash".to_string(),
            AttributeValue::S(user.password_hash.clone()),
        );
        item.insert("salt".to_string(), AttributeValue::S(user.salt.clone()));
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(user.created_at.to_rfc3339()),
        );
        item.insert(
            "updated_at".to_string(),
            AttributeValue::S(user.updated_at.to_rfc3339()),
        );
        if let Some(last_login) = &user.last_login {
            item.insert(
                "last_login".to_string(),
                AttributeValue::S(last_login.to_rfc3339()),
            );
        }
        item.insert(
            "is_active".to_string(),
            AttributeValue::Bool(user.is_active),
        );

        self.client
            .put_item()
            .table_name(&self.users_table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        log::info!("created user {}", user.email);
        Ok(())
    }

    pub async fn get_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, RepositoryError> {
        let mut key = HashMap::new();
        key.insert("id".to_string(), AttributeValue::S(user_id.to_string()));

        let result = self
            .client
            .get_item()
            .table_name(&self.users_table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        match result.item {
            Some(item) => Ok(Some(parse_user_from_item(item)?)),
            None => Ok(None),
        }
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let result = self
            .client
            .scan()
            .table_name(&self.users_table)
            .filter_expression("email = :email")
            .expression_attribute_values(":email", AttributeValue::S(email.to_string()))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        if let Some(items) = result.items {
            if let Some(item) = items.into_iter().next() {
                return Ok(Some(parse_user_from_item(item)?));
            }
        }
        Ok(None)
    }

    pub async fn update_last_login(&self, user_id: Uuid) -> Result<(), RepositoryError> {
        let mut key = HashMap::new();
        key.insert("id".to_string(), AttributeValue::S(user_id.to_string()));

        let now = Utc::now().to_rfc3339();
        self.client
            .update_item()
            .table_name(&self.users_table)
            .set_key(Some(key))
            .update_expression("SET last_login = :now, updated_at = :now")
            .expression_attribute_values(":now", AttributeValue::S(now))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;
        Ok(())
    }

    // Patient operations

    pub async fn create_patient(&self, patient: &Patient) -> Result<(), RepositoryError> {
        let mut item = HashMap::new();
        item.insert("id".to_string(), AttributeValue::S(patient.id.to_string()));
        item.insert("name".to_string(), AttributeValue::S(patient.name.clone()));
        item.insert(
            "demographics".to_string(),
            AttributeValue::S(patient.demographics.clone()),
        );
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(patient.created_at.to_rfc3339()),
        );

        self.client
            .put_item()
            .table_name(&self.patients_table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;
        Ok(())
    }

    pub async fn get_patient(&self, patient_id: Uuid) -> Result<Patient, RepositoryError> {
        let mut key = HashMap::new();
        key.insert("id".to_string(), AttributeValue::S(patient_id.to_string()));

        let result = self
            .client
            .get_item()
            .table_name(&self.patients_table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        match result.item {
            Some(item) => parse_patient_from_item(item),
            None => Err(RepositoryError::NotFound),
        }
    }

    // Diagnosis operations

    pub async fn create_diagnosis(&self, record: &DiagnosisRecord) -> Result<(), RepositoryError> {
        let mut item = HashMap::new();
        item.insert("id".to_string(), AttributeValue::S(record.id.to_string()));
        item.insert(
            "patient_id".to_string(),
            AttributeValue::S(record.patient_id.to_string()),
        );
        item.insert(
            "disease_key".to_string(),
            AttributeValue::S(record.disease_key.clone()),
        );
        item.insert("label".to_string(), AttributeValue::S(record.label.clone()));
        item.insert(
            "probs".to_string(),
            AttributeValue::S(record.probs.to_string()),
        );
        item.insert(
            "model_version".to_string(),
            AttributeValue::S(record.model_version.clone()),
        );
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(record.created_at.to_rfc3339()),
        );

        self.client
            .put_item()
            .table_name(&self.diagnoses_table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        log::info!(
            "stored diagnosis {} ({} -> {})",
            record.id,
            record.disease_key,
            record.label
        );
        Ok(())
    }

    pub async fn recent_diagnoses(
        &self,
        limit: usize,
    ) -> Result<Vec<DiagnosisRecord>, RepositoryError> {
        let result = self
            .client
            .scan()
            .table_name(&self.diagnoses_table)
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        let mut records = Vec::new();
        if let Some(items) = result.items {
            for item in items {
                records.push(parse_diagnosis_from_item(item)?);
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    pub async fn count_diagnoses(&self) -> Result<i64, RepositoryError> {
        let result = self
            .client
            .scan()
            .table_name(&self.diagnoses_table)
            .select(Select::Count)
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;
        Ok(result.count as i64)
    }

    /// Count of diagnoses whose label marks a positive screen. Zero is a
    /// real answer here, distinct from the store being unreachable.
    pub async fn count_diagnoses_with_labels(
        &self,
        labels: &[&str],
    ) -> Result<i64, RepositoryError> {
        if labels.is_empty() {
            return Ok(0);
        }
        let placeholders: Vec<String> = (0..labels.len()).map(|i| format!(":l{}", i)).collect();
        let mut scan = self
            .client
            .scan()
            .table_name(&self.diagnoses_table)
            .select(Select::Count)
            .filter_expression(format!("label IN ({})", placeholders.join(", ")));
        for (placeholder, label) in placeholders.iter().zip(labels) {
            scan =
                scan.expression_attribute_values(placeholder, AttributeValue::S(label.to_string()));
        }
        let result = scan
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;
        Ok(result.count as i64)
    }
}

fn get_string(
    item: &HashMap<String, AttributeValue>,
    field: &str,
) -> Result<String, RepositoryError> {
    item.get(field)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| RepositoryError::InvalidData(format!("Invalid {}", field)))
}

fn get_uuid(item: &HashMap<String, AttributeValue>, field: &str) -> Result<Uuid, RepositoryError> {
    item.get(field)
        .and_then(|v| v.as_s().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| RepositoryError::InvalidData(format!("Invalid {}", field)))
}

fn get_datetime(
    item: &HashMap<String, AttributeValue>,
    field: &str,
) -> Result<DateTime<Utc>, RepositoryError> {
    item.get(field)
        .and_then(|v| v.as_s().ok())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| RepositoryError::InvalidData(format!("Invalid {}", field)))
}

fn parse_user_from_item(item: HashMap<String, AttributeValue>) -> Result<User, RepositoryError> {
    let last_login = match item.get("last_login").and_then(|v| v.as_s().ok()) {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| RepositoryError::InvalidData("Invalid last_login".to_string()))?,
        ),
        None => None,
    };
    let is_active = *item
        .get("is_active")
        .and_then(|v| v.as_bool().ok())
        .ok_or_else(|| RepositoryError::InvalidData("Invalid is_active".to_string()))?;

    Ok(User {
        id: get_uuid(&item, "id")?,
        email: get_string(&item, "email")?,
        name: get_string(&item, "name")?,
        role: get_string(&item, "user_role")?,
        password_hash: get_string(&item, "password_hash")?,
        salt: get_string(&item, "salt")?,
        created_at: get_datetime(&item, "created_at")?,
        updated_at: get_datetime(&item, "updated_at")?,
        last_login,
        is_active,
    })
}

fn parse_patient_from_item(
    item: HashMap<String, AttributeValue>,
) -> Result<Patient, RepositoryError> {
    Ok(Patient {
        id: get_uuid(&item, "id")?,
        name: get_string(&item, "name")?,
        demographics: get_string(&item, "demographics")?,
        created_at: get_datetime(&item, "created_at")?,
    })
}

fn parse_diagnosis_from_item(
    item: HashMap<String, AttributeValue>,
) -> Result<DiagnosisRecord, RepositoryError> {
    let probs = item
        .get("probs")
        .and_then(|v| v.as_s().ok())
        .and_then(|s| serde_json::from_str(s).ok())
        .ok_or_else(|| RepositoryError::InvalidData("Invalid probs".to_string()))?;

    Ok(DiagnosisRecord {
        id: get_uuid(&item, "id")?,
        patient_id: get_uuid(&item, "patient_id")?,
        disease_key: get_string(&item, "disease_key")?,
        label: get_string(&item, "label")?,
        probs,
        model_version: get_string(&item, "model_version")?,
        created_at: get_datetime(&item, "created_at")?,
    })
}
