use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-attempt values the engine hands to the executor and resolver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConstants {
    /// Token authorizing calls back to the platform API.
    pub engine_token: String,
    pub api_url: String,
    pub project_id: String,
    /// Payload delivered to the paused step when a run resumes.
    #[serde(default)]
    pub resume_payload: Option<Value>,
}

impl EngineConstants {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    pub fn with_api(mut self, api_url: impl Into<String>, engine_token: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self.engine_token = engine_token.into();
        self
    }

    pub fn with_resume_payload(mut self, payload: Value) -> Self {
        self.resume_payload = Some(payload);
        self
    }
}
