use crate::{LanguageModelInput, LanguageModelResult, ModelResponse, ModelUsage};
use opentelemetry::trace::Status;
use std::time::Instant;
use tracing::{info_span, Span};
use tracing_futures::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub struct LmSpan {
    span: Span,
    usage: Option<ModelUsage>,
    start_time: Instant,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
    candidate_count: Option<u32>,
    reasoning_budget: Option<u32>,
    ended: bool,
}

impl LmSpan {
    pub fn new(provider: &str, model_id: &str, input: &LanguageModelInput) -> Self {
        let span = info_span!("llm_sdk.generate");
        span.set_attribute("gen_ai.operation.name", "generate_content");
        span.set_attribute("gen_ai.provider.name", provider.to_string());
        span.set_attribute("gen_ai.request.model", model_id.to_string());

        Self {
            span,
            usage: None,
            start_time: Instant::now(),
            max_tokens: input.max_tokens,
            temperature: input.temperature,
            candidate_count: input.candidate_count,
            reasoning_budget: input.reasoning.as_ref().and_then(|r| r.budget_tokens),
            ended: false,
        }
    }

    pub async fn instrument_future<F>(&self, future: F) -> F::Output
    where
        F: std::future::Future,
    {
        future.instrument(self.span.clone()).await
    }

    pub fn on_response(&mut self, response: &ModelResponse) {
        if let Some(usage) = &response.usage {
            self.usage = Some(usage.clone());
        }
    }

    pub fn on_error(&mut self, error: &(dyn std::error::Error + 'static)) {
        self.span
            .set_attribute("exception.message", error.to_string());
        self.span.set_status(Status::error(error.to_string()));
    }

    pub fn on_end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;

        if let Some(usage) = &self.usage {
            self.span
                .set_attribute("gen_ai.usage.input_tokens", i64::from(usage.input_tokens));
            self.span
                .set_attribute("gen_ai.usage.output_tokens", i64::from(usage.output_tokens));
            if let Some(reasoning_tokens) = usage.reasoning_tokens {
                self.span
                    .set_attribute("gen_ai.usage.reasoning_tokens", i64::from(reasoning_tokens));
            }
        }

        if let Some(max_tokens) = self.max_tokens {
            self.span
                .set_attribute("gen_ai.request.max_tokens", i64::from(max_tokens));
        }
        if let Some(temperature) = self.temperature {
            self.span
                .set_attribute("gen_ai.request.temperature", temperature);
        }
        if let Some(candidate_count) = self.candidate_count {
            self.span
                .set_attribute("gen_ai.request.choice.count", i64::from(candidate_count));
        }
        if let Some(reasoning_budget) = self.reasoning_budget {
            self.span
                .set_attribute("llm_sdk.reasoning.budget_tokens", i64::from(reasoning_budget));
        }

        self.span
            .set_attribute("llm_sdk.duration_seconds", self.start_time.elapsed().as_secs_f64());
    }
}

impl Drop for LmSpan {
    fn drop(&mut self) {
        self.on_end();
    }
}

pub async fn trace_generate<F, Fut>(
    provider: &str,
    model_id: &str,
    input: LanguageModelInput,
    f: F,
) -> LanguageModelResult<ModelResponse>
where
    F: FnOnce(LanguageModelInput) -> Fut,
    Fut: std::future::Future<Output = LanguageModelResult<ModelResponse>>,
{
    let mut span = LmSpan::new(provider, model_id, &input);
    let result = span.instrument_future(f(input)).await;

    match &result {
        Ok(response) => span.on_response(response),
        Err(error) => span.on_error(error),
    }

    span.on_end();
    result
}
