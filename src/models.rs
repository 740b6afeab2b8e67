use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Generate request, forwarded upstream as-is
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub stream: bool,
    // provider options we do not interpret
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            stream: false,
            options: Map::new(),
        }
    }
}

// Upstream response body, returned to the caller untouched
pub type GenerateResponse = Value;
