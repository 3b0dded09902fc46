use super::api::{
    Blob, Content, GenerateContentConfig, GenerateContentParameters, GenerateContentResponse,
    GenerateContentResponseUsageMetadata, Part as GooglePart, ThinkingConfig,
};
use crate::{
    client_utils, LanguageModel, LanguageModelError, LanguageModelInput, LanguageModelResult,
    Message, ModelResponse, ModelUsage, Part, ReasoningPart, ResponseFormatOption,
};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client,
};
use std::collections::HashMap;

const PROVIDER: &str = "google";

pub struct GoogleModel {
    model_id: String,
    api_key: String,
    base_url: String,
    client: Client,
    headers: HashMap<String, String>,
}

#[derive(Clone, Default)]
pub struct GoogleModelOptions {
    pub api_key: String,
    pub base_url: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub client: Option<Client>,
}

impl GoogleModel {
    #[must_use]
    pub fn new(model_id: impl Into<String>, options: GoogleModelOptions) -> Self {
        let GoogleModelOptions {
            api_key,
            base_url,
            headers,
            client,
        } = options;

        let base_url = base_url
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string())
            .trim_end_matches('/')
            .to_string();
        let client = client.unwrap_or_else(Client::new);
        let headers = headers.unwrap_or_default();

        Self {
            model_id: model_id.into(),
            api_key,
            base_url,
            client,
            headers,
        }
    }

    fn request_headers(&self) -> LanguageModelResult<HeaderMap> {
        let mut headers = HeaderMap::new();

        for (key, value) in &self.headers {
            let header_name = HeaderName::from_bytes(key.as_bytes()).map_err(|error| {
                LanguageModelError::InvalidInput(format!(
                    "Invalid Google header name '{key}': {error}"
                ))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|error| {
                LanguageModelError::InvalidInput(format!(
                    "Invalid Google header value for '{key}': {error}"
                ))
            })?;
            headers.insert(header_name, header_value);
        }

        Ok(headers)
    }
}

#[async_trait::async_trait]
impl LanguageModel for GoogleModel {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn model_id(&self) -> String {
        self.model_id.clone()
    }

    async fn generate(&self, input: LanguageModelInput) -> LanguageModelResult<ModelResponse> {
        crate::opentelemetry::trace_generate(
            self.provider(),
            &self.model_id,
            input,
            |input| async move {
                let params = convert_to_generate_content_parameters(input)?;

                let url = format!(
                    "{}/models/{}:generateContent?key={}",
                    self.base_url, self.model_id, self.api_key
                );

                let headers = self.request_headers()?;
                let response: GenerateContentResponse =
                    client_utils::send_json(&self.client, &url, &params, headers).await?;

                map_generate_content_response(response)
            },
        )
        .await
    }
}

fn convert_to_generate_content_parameters(
    input: LanguageModelInput,
) -> LanguageModelResult<GenerateContentParameters> {
    if input.messages.is_empty() {
        return Err(LanguageModelError::InvalidInput(
            "At least one message is required".to_string(),
        ));
    }

    let mut params = GenerateContentParameters {
        contents: convert_to_google_contents(input.messages),
        ..Default::default()
    };
    let mut config = GenerateContentConfig::default();

    if let Some(system_prompt) = input.system_prompt {
        params.system_instruction = Some(Content {
            role: Some("system".to_string()),
            parts: Some(vec![GooglePart {
                text: Some(system_prompt),
                ..Default::default()
            }]),
        });
    }

    if let Some(temp) = input.temperature {
        config.temperature = Some(temp);
    }
    if let Some(candidate_count) = input.candidate_count {
        config.candidate_count = Some(candidate_count);
    }
    if let Some(max_tokens) = input.max_tokens {
        config.max_output_tokens = Some(max_tokens);
    }

    if let Some(response_format) = input.response_format {
        let (response_mime_type, response_json_schema) =
            convert_to_google_response_schema(response_format);
        config.response_mime_type = Some(response_mime_type);
        config.response_json_schema = response_json_schema;
    }

    if let Some(reasoning) = input.reasoning {
        config.thinking_config = Some(ThinkingConfig {
            include_thoughts: Some(reasoning.enabled),
            thinking_budget: reasoning
                .budget_tokens
                .map(|t| i32::try_from(t).unwrap_or(i32::MAX)),
        });
    }

    params.generation_config = Some(config);

    params.extra = input.extra;

    Ok(params)
}

fn convert_to_google_contents(messages: Vec<Message>) -> Vec<Content> {
    messages
        .into_iter()
        .map(|message| match message {
            Message::User(user_message) => Content {
                role: Some("user".to_string()),
                parts: Some(
                    user_message
                        .content
                        .into_iter()
                        .map(convert_to_google_part)
                        .collect(),
                ),
            },
            Message::Assistant(assistant_message) => Content {
                role: Some("model".to_string()),
                parts: Some(
                    assistant_message
                        .content
                        .into_iter()
                        .map(convert_to_google_part)
                        .collect(),
                ),
            },
        })
        .collect()
}

fn convert_to_google_part(part: Part) -> GooglePart {
    match part {
        Part::Text(text_part) => GooglePart {
            text: Some(text_part.text),
            ..Default::default()
        },
        Part::Document(document_part) => GooglePart {
            inline_data: Some(Blob {
                data: document_part.data,
                mime_type: document_part.mime_type,
            }),
            ..Default::default()
        },
        Part::Reasoning(reasoning_part) => GooglePart {
            text: Some(reasoning_part.text),
            thought: Some(true),
            thought_signature: reasoning_part.signature,
            ..Default::default()
        },
    }
}

fn convert_to_google_response_schema(
    response_format: ResponseFormatOption,
) -> (String, Option<serde_json::Value>) {
    match response_format {
        ResponseFormatOption::Text => ("text/plain".to_string(), None),
        ResponseFormatOption::Json(json_format) => {
            ("application/json".to_string(), json_format.schema)
        }
    }
}

fn map_generate_content_response(
    response: GenerateContentResponse,
) -> LanguageModelResult<ModelResponse> {
    let usage = response
        .usage_metadata
        .as_ref()
        .map(map_google_usage_metadata);

    let Some(candidate) = response.candidates.and_then(|c| c.into_iter().next()) else {
        if let Some(block_reason) = response.prompt_feedback.and_then(|feedback| {
            feedback
                .block_reason_message
                .or(feedback.block_reason)
        }) {
            return Err(LanguageModelError::Refusal(block_reason));
        }
        return Err(LanguageModelError::Invariant(
            PROVIDER,
            "No candidate in response".to_string(),
        ));
    };

    if let Some(finish_reason) = candidate.finish_reason.as_deref() {
        if finish_reason != "STOP" {
            tracing::warn!(finish_reason, "google candidate did not finish normally");
        }
    }

    let content = map_google_content(candidate.content.and_then(|c| c.parts).unwrap_or_default());

    Ok(ModelResponse { content, usage })
}

fn map_google_content(parts: Vec<GooglePart>) -> Vec<Part> {
    parts
        .into_iter()
        .filter_map(|part| {
            let text = part.text?;
            if part.thought.unwrap_or(false) {
                Some(Part::Reasoning(ReasoningPart {
                    text,
                    signature: part.thought_signature,
                }))
            } else {
                Some(Part::text(text))
            }
        })
        .collect()
}

fn map_google_usage_metadata(usage: &GenerateContentResponseUsageMetadata) -> ModelUsage {
    ModelUsage {
        input_tokens: usage.prompt_token_count.unwrap_or(0),
        output_tokens: usage.candidates_token_count.unwrap_or(0),
        reasoning_tokens: usage.thoughts_token_count,
    }
}
