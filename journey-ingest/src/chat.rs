//! Semantic mapper backed by an OpenAI-compatible chat-completions endpoint.

use async_trait::async_trait;
use journey_core::MetricDictionary;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::collaborator::{parse_response_text, MapperError, MappingRequest, MappingResponse, SemanticMapper};
use crate::prompt;

const TEMPERATURE: f64 = 0.1;

pub struct ChatCompletionMapper {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
}

impl ChatCompletionMapper {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dictionary: &MetricDictionary,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            system_prompt: prompt::system_prompt(dictionary),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

fn request_error(err: reqwest::Error) -> MapperError {
    if err.is_connect() || err.is_timeout() {
        MapperError::Unavailable(err.to_string())
    } else {
        MapperError::Http(err.to_string())
    }
}

#[async_trait]
impl SemanticMapper for ChatCompletionMapper {
    async fn propose(&self, request: &MappingRequest) -> Result<MappingResponse, MapperError> {
        let user_prompt =
            prompt::user_prompt(request).map_err(|err| MapperError::Malformed(err.to_string()))?;

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": user_prompt },
            ],
            "temperature": TEMPERATURE,
        });

        let mut call = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let reply: Value = call
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?
            .json()
            .await
            .map_err(|err| MapperError::Malformed(err.to_string()))?;

        let content = reply["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| MapperError::Malformed("reply has no message content".to_string()))?;
        debug!(chars = content.len(), model = %self.model, "semantic mapper replied");

        parse_response_text(content)
    }
}
