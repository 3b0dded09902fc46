use crate::{prompt, EncodedPayload, VisualizerError};
use lumina_sdk::{
    LanguageModel, LanguageModelError, LanguageModelInput, Message, Part, ReasoningOptions,
    ResponseFormatJson, ResponseFormatOption,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, LazyLock},
};

pub const DEFAULT_MODEL_ID: &str = "gemini-3-pro-preview";
pub const DEFAULT_TITLE: &str = "Paper Visualization";

pub const PROGRESS_READING: &str = "Reading Paper & Deconstructing Logic...";
pub const PROGRESS_ANALYZING: &str = "Analyzing Architecture & Simulating Mechanics...";

/// Markers the service uses in free text when the reasoning budget is above
/// its limit. There is no structured error code for this case.
const BUDGET_EXCEEDED_MARKERS: [&str; 2] = ["thinking_budget", "thinkingbudget"];

/// Fixed request parameters sent with every generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub reasoning_budget: u32,
    pub temperature: f64,
    pub candidate_count: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            // Service limit is 65535.
            reasoning_budget: 64000,
            temperature: 0.5,
            candidate_count: 1,
        }
    }
}

/// Structured result of one generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visualization {
    pub title: String,
    pub html: String,
}

/// Receives human-readable progress while a generation call is running.
pub trait ProgressSink: Send + Sync {
    fn report(&self, status: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn report(&self, status: &str) {
        self(status);
    }
}

#[derive(Deserialize)]
struct RawVisualization {
    title: Option<String>,
    html: Option<String>,
}

/// Turns an encoded document plus an optional focus instruction into a
/// [`Visualization`] with exactly one model call. No retry, no timeout.
#[derive(Clone)]
pub struct VisualizationClient {
    model: Arc<dyn LanguageModel>,
    settings: GenerationSettings,
}

impl VisualizationClient {
    #[must_use]
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            settings: GenerationSettings::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn model_id(&self) -> String {
        self.model.model_id()
    }

    pub async fn generate(
        &self,
        payload: &EncodedPayload,
        instruction: &str,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<Visualization, VisualizerError> {
        if payload.is_empty() {
            return Err(VisualizerError::InvalidInput(
                "The encoded document is empty".to_string(),
            ));
        }

        notify(progress, PROGRESS_READING);
        let input = self.build_input(payload, instruction);

        notify(progress, PROGRESS_ANALYZING);
        let response = self
            .model
            .generate(input)
            .await
            .map_err(classify_model_error)?;

        if let Some(usage) = &response.usage {
            tracing::info!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                reasoning_tokens = usage.reasoning_tokens,
                "visualization generated"
            );
        }

        parse_visualization(response.text().as_deref().unwrap_or("{}"))
    }

    fn build_input(&self, payload: &EncodedPayload, instruction: &str) -> LanguageModelInput {
        LanguageModelInput {
            messages: vec![Message::user(vec![
                Part::document(payload.data(), payload.media_type()),
                Part::text(prompt::build_visualization_prompt(instruction)),
            ])],
            response_format: Some(ResponseFormatOption::Json(ResponseFormatJson {
                name: "visualization".to_string(),
                description: Some(
                    "The extracted paper title and a self-contained HTML document.".to_string(),
                ),
                schema: Some(visualization_schema()),
            })),
            temperature: Some(self.settings.temperature),
            candidate_count: Some(self.settings.candidate_count),
            reasoning: Some(ReasoningOptions {
                enabled: false,
                budget_tokens: Some(self.settings.reasoning_budget),
            }),
            ..Default::default()
        }
    }
}

fn visualization_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "html": {"type": "string"}
        },
        "required": ["title", "html"]
    })
}

fn notify(progress: Option<&dyn ProgressSink>, status: &str) {
    let Some(sink) = progress else {
        return;
    };
    if catch_unwind(AssertUnwindSafe(|| sink.report(status))).is_err() {
        tracing::warn!(status, "progress sink panicked; continuing generation");
    }
}

/// Decide whether a model failure is the budget-exceeded condition. This is
/// the only place that inspects error text.
#[must_use]
pub fn classify_model_error(error: LanguageModelError) -> VisualizerError {
    let message = error.to_string().to_lowercase();
    if BUDGET_EXCEEDED_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
    {
        VisualizerError::BudgetExceeded(error)
    } else {
        VisualizerError::Generation(Box::new(error))
    }
}

fn parse_visualization(text: &str) -> Result<Visualization, VisualizerError> {
    let raw: RawVisualization =
        serde_json::from_str(text).map_err(|error| VisualizerError::Generation(Box::new(error)))?;

    let html = raw
        .html
        .map(|html| normalize_document(&html))
        .unwrap_or_default();
    if html.is_empty() {
        return Err(VisualizerError::EmptyGeneration);
    }

    let title = raw
        .title
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    Ok(Visualization { title, html })
}

fn normalize_document(html: &str) -> String {
    let trimmed = html.trim();
    if trimmed.starts_with('<') {
        trimmed.to_string()
    } else {
        clean_code_block(trimmed)
    }
}

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```(?:html)?\s*(.*?)```").expect("fenced block pattern is valid")
});

/// Extract an HTML document from model text that may be wrapped in a Markdown
/// code fence or preceded by prose.
#[must_use]
pub fn clean_code_block(text: &str) -> String {
    if let Some(inner) = FENCED_BLOCK
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim())
        .filter(|inner| !inner.is_empty())
    {
        return inner.to_string();
    }

    if let Some(index) = text.find("<!DOCTYPE html>") {
        return text[index..].trim().to_string();
    }

    let mut cleaned = text.trim();
    cleaned = cleaned
        .strip_prefix("```html")
        .or_else(|| cleaned.strip_prefix("```"))
        .unwrap_or(cleaned);
    cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned);
    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumina_sdk::testing::MockLanguageModel;
    use std::sync::Mutex;

    fn payload() -> EncodedPayload {
        EncodedPayload::from_bytes(b"%PDF-1.4 test", crate::PDF_MEDIA_TYPE)
    }

    fn client(model: &Arc<MockLanguageModel>) -> VisualizationClient {
        VisualizationClient::new(model.clone())
    }

    #[tokio::test]
    async fn builds_request_with_document_schema_and_budget() {
        let model = Arc::new(MockLanguageModel::new());
        model.enqueue_generate(lumina_sdk::testing::MockGenerateResult::text(
            r#"{"title":"MemGPT","html":"<html>sim</html>"}"#,
        ));

        let result = client(&model)
            .generate(&payload(), "", None)
            .await
            .unwrap();

        assert_eq!(
            result,
            Visualization {
                title: "MemGPT".to_string(),
                html: "<html>sim</html>".to_string(),
            }
        );

        let inputs = model.tracked_generate_inputs();
        assert_eq!(inputs.len(), 1);
        let input = &inputs[0];
        assert_eq!(input.temperature, Some(0.5));
        assert_eq!(input.candidate_count, Some(1));
        assert_eq!(
            input.reasoning.as_ref().and_then(|r| r.budget_tokens),
            Some(64000)
        );
        let Message::User(message) = &input.messages[0] else {
            panic!("expected a user message");
        };
        assert_eq!(
            message.content[0],
            Part::document(payload().data(), "application/pdf")
        );
        let Some(ResponseFormatOption::Json(format)) = &input.response_format else {
            panic!("expected a JSON response format");
        };
        assert_eq!(
            format.schema.as_ref().map(|s| s["required"].clone()),
            Some(json!(["title", "html"]))
        );
    }

    #[tokio::test]
    async fn reports_progress_before_the_remote_call() {
        let model = Arc::new(MockLanguageModel::new());
        model.enqueue_generate(lumina_sdk::testing::MockGenerateResult::text(
            r#"{"title":"T","html":"<html></html>"}"#,
        ));
        let seen = Mutex::new(Vec::new());
        let sink = |status: &str| seen.lock().unwrap().push(status.to_string());

        client(&model)
            .generate(&payload(), "focus", Some(&sink))
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![PROGRESS_READING.to_string(), PROGRESS_ANALYZING.to_string()]
        );
    }

    #[tokio::test]
    async fn panicking_sink_does_not_fail_generation() {
        let model = Arc::new(MockLanguageModel::new());
        model.enqueue_generate(lumina_sdk::testing::MockGenerateResult::text(
            r#"{"title":"T","html":"<html></html>"}"#,
        ));
        let sink = |_: &str| panic!("sink failure");

        let result = client(&model).generate(&payload(), "", Some(&sink)).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn empty_payload_is_rejected_without_calling_the_model() {
        let model = Arc::new(MockLanguageModel::new());
        let empty = EncodedPayload::from_bytes(b"", crate::PDF_MEDIA_TYPE);

        let error = client(&model).generate(&empty, "", None).await.unwrap_err();

        assert!(matches!(error, VisualizerError::InvalidInput(_)));
        assert!(model.tracked_generate_inputs().is_empty());
    }

    #[test]
    fn empty_html_is_an_empty_generation() {
        assert!(matches!(
            parse_visualization(r#"{"title":"X","html":""}"#),
            Err(VisualizerError::EmptyGeneration)
        ));
        assert!(matches!(
            parse_visualization("{}"),
            Err(VisualizerError::EmptyGeneration)
        ));
    }

    #[test]
    fn malformed_json_is_a_generation_error() {
        assert!(matches!(
            parse_visualization("not json"),
            Err(VisualizerError::Generation(_))
        ));
    }

    #[test]
    fn blank_title_falls_back_to_default() {
        let visualization = parse_visualization(r#"{"title":"  ","html":"<p>x</p>"}"#).unwrap();
        assert_eq!(visualization.title, DEFAULT_TITLE);
    }

    #[test]
    fn classifies_budget_errors_by_text() {
        let error = classify_model_error(LanguageModelError::StatusCode(
            reqwest_status(400),
            "Invalid thinking_budget: must be at most 32768".to_string(),
        ));
        assert!(matches!(error, VisualizerError::BudgetExceeded(_)));

        let error = classify_model_error(LanguageModelError::InvalidInput(
            "thinkingBudget too large".to_string(),
        ));
        assert!(matches!(error, VisualizerError::BudgetExceeded(_)));

        let error = classify_model_error(LanguageModelError::Refusal("SAFETY".to_string()));
        assert!(matches!(error, VisualizerError::Generation(_)));
    }

    fn reqwest_status(code: u16) -> lumina_sdk::StatusCode {
        lumina_sdk::StatusCode::from_u16(code).unwrap()
    }

    #[test]
    fn cleans_fenced_and_prefixed_documents() {
        assert_eq!(
            clean_code_block("Here you go:\n```html\n<!DOCTYPE html><html></html>\n```\nEnjoy"),
            "<!DOCTYPE html><html></html>"
        );
        assert_eq!(
            clean_code_block("Sure! <!DOCTYPE html><html></html>  "),
            "<!DOCTYPE html><html></html>"
        );
        assert_eq!(clean_code_block("<html></html>"), "<html></html>");
        assert_eq!(clean_code_block("```"), "");
    }

    #[test]
    fn fenced_html_field_is_unwrapped() {
        let visualization =
            parse_visualization(r#"{"title":"T","html":"```html\n<canvas></canvas>\n```"}"#)
                .unwrap();
        assert_eq!(visualization.html, "<canvas></canvas>");
    }
}
