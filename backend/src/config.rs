use std::env;
use std::path::PathBuf;

/// Runtime configuration, collected once at startup from the environment
/// (`.env` is loaded first by main). Every value has a development default
/// so the service comes up on a bare machine.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub model_root: PathBuf,
    pub jwt_secret: String,
    pub users_table: String,
    pub patients_table: String,
    pub diagnoses_table: String,
    pub cors_origins: Vec<String>,
    /// Deadline applied at the dispatch boundary. The forward pass itself
    /// is not cancellable; expiry only abandons the result.
    pub inference_timeout_ms: Option<u64>,
    pub preload_models: bool,
}

impl Settings {
    pub fn from_env() -> Self {
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            log::warn!("JWT_SECRET is not set; using the development default");
            "change-me".to_string()
        });

        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            model_root: env::var("MODEL_ROOT")
                .unwrap_or_else(|_| "./models".to_string())
                .into(),
            jwt_secret,
            users_table: env::var("DYNAMODB_USERS_TABLE")
                .unwrap_or_else(|_| "healthlens-users".to_string()),
            patients_table: env::var("DYNAMODB_PATIENTS_TABLE")
                .unwrap_or_else(|_| "healthlens-patients".to_string()),
            diagnoses_table: env::var("DYNAMODB_DIAGNOSES_TABLE")
                .unwrap_or_else(|_| "healthlens-diagnoses".to_string()),
            cors_origins: parse_origins(&env::var("CORS_ORIGINS").unwrap_or_default()),
            inference_timeout_ms: env::var("INFERENCE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok()),
            preload_models: env::var("PRELOAD_MODELS")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
        }
    }
}

pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_split_on_commas_and_trim() {
        assert_eq!(
            parse_origins("http://localhost:5173, http://127.0.0.1:5173 ,"),
            vec!["http://localhost:5173", "http://127.0.0.1:5173"]
        );
        assert!(parse_origins("").is_empty());
    }
}
