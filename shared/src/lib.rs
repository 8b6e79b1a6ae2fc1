use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// What a pipeline consumes: an uploaded image or a map of named numeric
/// features. Serialized in snake_case on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InputKind {
    Image,
    Tabular,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceMeta {
    pub version: String,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis_id: Option<Uuid>,
}

/// Result of one inference call. `probs` carries every label of the
/// pipeline, including near-zero ones, so clients can render the full
/// distribution. BTreeMap keeps the JSON key order stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub label: String,
    pub probs: BTreeMap<String, f32>,
    pub meta: InferenceMeta,
}

/// One row of the disease listing endpoint, derived from the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiseaseInfo {
    pub key: String,
    pub name: String,
    pub input_kind: InputKind,
    pub version: String,
    pub loaded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub explainable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Explanation {
    pub fn unsupported() -> Self {
        Self {
            explainable: false,
            detail: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_kind_snake_case_round_trip() {
        let json = serde_json::to_string(&InputKind::Tabular).unwrap();
        assert_eq!(json, r#""tabular""#);
        assert_eq!(InputKind::Image.to_string(), "image");
    }
}
