use serde::Serialize;
use shared::InferenceResponse;
use uuid::Uuid;

use crate::db::dynamodb_repository::{DynamoDbRepository, RepositoryError};
use crate::db::models::DiagnosisRecord;

/// Labels that count as a positive screen in the stats summary.
const POSITIVE_LABELS: [&str; 2] = ["positive", "suspected"];

#[derive(Clone)]
pub struct DiagnosisService {
    repo: DynamoDbRepository,
}

/// Stats failures are explicit so callers choose degraded defaults
/// deliberately: an unreachable store is not the same as zero diagnoses.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("diagnosis store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub new_diagnoses: i64,
    pub positive_flags: i64,
}

impl DiagnosisService {
    pub fn new(repo: DynamoDbRepository) -> Self {
        Self { repo }
    }

    /// Converts a pipeline result into a durable record. The record id is
    /// chosen by the caller before the write so it can be returned to the
    /// client while persistence completes in the background.
    pub async fn persist(
        &self,
        diagnosis_id: Uuid,
        patient_id: Uuid,
        disease_key: &str,
        response: &InferenceResponse,
    ) -> Result<DiagnosisRecord, RepositoryError> {
        let record = DiagnosisRecord::new(
            diagnosis_id,
            patient_id,
            disease_key.to_string(),
            response.label.clone(),
            serde_json::to_value(&response.probs)?,
            response.meta.version.clone(),
        );
        self.repo.create_diagnosis(&record).await?;
        Ok(record)
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<DiagnosisRecord>, RepositoryError> {
        self.repo.recent_diagnoses(limit).await
    }

    pub async fn summary(&self) -> Result<StatsSummary, StatsError> {
        let new_diagnoses = self
            .repo
            .count_diagnoses()
            .await
            .map_err(|e| StatsError::Unavailable(e.to_string()))?;
        let positive_flags = self
            .repo
            .count_diagnoses_with_labels(&POSITIVE_LABELS)
            .await
            .map_err(|e| StatsError::Unavailable(e.to_string()))?;
        Ok(StatsSummary {
            new_diagnoses,
            positive_flags,
        })
    }
}
