use crate::session::Phase;
use lumina_sdk::LanguageModelError;
use thiserror::Error;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum VisualizerError {
    /// The upload was rejected at the boundary (e.g. not a PDF). The session
    /// is left untouched.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// The uploaded document could not be read.
    #[error("Failed to encode document: {0}")]
    Encoding(#[source] std::io::Error),
    /// The model refused the request because the requested reasoning budget
    /// is above the service limit.
    #[error("Reasoning budget exceeded: {0}")]
    BudgetExceeded(#[source] LanguageModelError),
    /// The model answered with a valid structure but no document.
    #[error("The model generated an empty response.")]
    EmptyGeneration,
    /// Any other failure of the generation call (transport, service error,
    /// malformed structured output).
    #[error("{0}")]
    Generation(#[source] BoxedError),
    #[error("A refine instruction is required")]
    EmptyInstruction,
    #[error("Cannot {action} while the session is {phase}")]
    InvalidTransition { action: &'static str, phase: Phase },
}
