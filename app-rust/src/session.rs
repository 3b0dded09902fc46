use crate::{generation::Visualization, EncodedPayload, VisualizerError};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

pub const STATUS_INITIALIZING: &str = "Initializing system...";
pub const STATUS_ANALYZING_FOCUS: &str = "Analyzing with custom focus...";
pub const STATUS_ANALYZING_DEFAULT: &str = "Analyzing research logic...";
pub const STATUS_REFINING: &str = "Refining visualization...";
pub const STATUS_READY: &str = "Visualization ready.";
pub const STATUS_BUDGET_EXCEEDED: &str = "Error: Complexity exceeded token limit.";
pub const STATUS_GENERIC_FAILURE: &str = "Generation failed.";

/// The phase of the session. Every available action is derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Processing,
    Completed,
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Handle to the uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub media_type: String,
}

/// The generated document and its extracted title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub title: String,
    pub html: String,
    /// The focus instruction this artifact was generated with, if any.
    pub instruction: Option<String>,
}

impl Artifact {
    /// Approximate output size in kilobytes.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn size_kb(&self) -> f64 {
        self.html.len() as f64 / 1024.0
    }
}

/// What a generation call needs, captured when it was triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub payload: Arc<EncodedPayload>,
    pub instruction: String,
}

/// The single live unit of state for one upload-generate-refine cycle.
///
/// Fields are only changed through the transition methods below; an illegal
/// trigger returns [`VisualizerError::InvalidTransition`] and leaves the
/// session as it was.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    phase: Phase,
    source_file: Option<SourceFile>,
    encoded_payload: Option<Arc<EncodedPayload>>,
    artifact: Option<Artifact>,
    status_message: String,
    pending_instruction: String,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn source_file(&self) -> Option<&SourceFile> {
        self.source_file.as_ref()
    }

    #[must_use]
    pub fn encoded_payload(&self) -> Option<&Arc<EncodedPayload>> {
        self.encoded_payload.as_ref()
    }

    #[must_use]
    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    #[must_use]
    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    #[must_use]
    pub fn pending_instruction(&self) -> &str {
        &self.pending_instruction
    }

    fn ensure_not_processing(&self, action: &'static str) -> Result<(), VisualizerError> {
        if self.phase == Phase::Processing {
            return Err(VisualizerError::InvalidTransition {
                action,
                phase: self.phase,
            });
        }
        Ok(())
    }

    fn ensure_processing(&self, action: &'static str) -> Result<(), VisualizerError> {
        if self.phase != Phase::Processing {
            return Err(VisualizerError::InvalidTransition {
                action,
                phase: self.phase,
            });
        }
        Ok(())
    }

    /// Update the steering text for the next generation call.
    pub fn set_instruction(&mut self, instruction: impl Into<String>) -> Result<(), VisualizerError> {
        self.ensure_not_processing("edit the instruction")?;
        self.pending_instruction = instruction.into();
        Ok(())
    }

    /// A new document was picked. Valid from every phase but `Processing`;
    /// replaces any previous file, payload and artifact.
    pub fn select_file(&mut self, file: SourceFile) -> Result<(), VisualizerError> {
        self.ensure_not_processing("select a file")?;
        self.phase = Phase::Processing;
        self.source_file = Some(file);
        self.encoded_payload = None;
        self.artifact = None;
        self.status_message = STATUS_INITIALIZING.to_string();
        Ok(())
    }

    /// Store the encoding of the selected file. Accepted once per selection.
    pub fn store_payload(&mut self, payload: EncodedPayload) -> Result<(), VisualizerError> {
        self.ensure_processing("store the encoded document")?;
        if self.encoded_payload.is_some() || self.source_file.is_none() {
            return Err(VisualizerError::InvalidTransition {
                action: "store the encoded document",
                phase: self.phase,
            });
        }
        self.encoded_payload = Some(Arc::new(payload));
        Ok(())
    }

    /// Capture the inputs of the initial generation call for the stored
    /// payload and announce the analysis.
    pub fn begin_generation(&mut self) -> Result<GenerationRequest, VisualizerError> {
        self.ensure_processing("start generation")?;
        let payload = self
            .encoded_payload
            .clone()
            .ok_or(VisualizerError::InvalidTransition {
                action: "start generation",
                phase: self.phase,
            })?;

        self.status_message = if self.pending_instruction.trim().is_empty() {
            STATUS_ANALYZING_DEFAULT
        } else {
            STATUS_ANALYZING_FOCUS
        }
        .to_string();

        Ok(GenerationRequest {
            payload,
            instruction: self.pending_instruction.clone(),
        })
    }

    /// Re-run generation on the stored payload with the pending instruction.
    /// Valid from `Completed`, and from `Error` as a retry, as long as the
    /// document was encoded.
    pub fn begin_refine(&mut self) -> Result<GenerationRequest, VisualizerError> {
        const ACTION: &str = "refine the visualization";

        if !matches!(self.phase, Phase::Completed | Phase::Error) {
            return Err(VisualizerError::InvalidTransition {
                action: ACTION,
                phase: self.phase,
            });
        }
        if self.pending_instruction.trim().is_empty() {
            return Err(VisualizerError::EmptyInstruction);
        }
        let payload = self
            .encoded_payload
            .clone()
            .ok_or(VisualizerError::InvalidTransition {
                action: ACTION,
                phase: self.phase,
            })?;

        self.phase = Phase::Processing;
        self.artifact = None;
        self.status_message = STATUS_REFINING.to_string();

        Ok(GenerationRequest {
            payload,
            instruction: self.pending_instruction.clone(),
        })
    }

    /// Progress text from the running generation call. Ignored once the
    /// call has resolved.
    pub fn report_progress(&mut self, status: &str) -> bool {
        if self.phase != Phase::Processing {
            return false;
        }
        self.status_message = status.to_string();
        true
    }

    /// The generation call resolved; the new artifact replaces any previous
    /// one and the consumed instruction is cleared.
    pub fn complete(
        &mut self,
        visualization: Visualization,
        instruction: &str,
    ) -> Result<&Artifact, VisualizerError> {
        self.ensure_processing("complete generation")?;
        let instruction = instruction.trim();
        self.phase = Phase::Completed;
        self.status_message = STATUS_READY.to_string();
        self.pending_instruction.clear();
        Ok(self.artifact.insert(Artifact {
            title: visualization.title,
            html: visualization.html,
            instruction: (!instruction.is_empty()).then(|| instruction.to_string()),
        }))
    }

    /// The generation path failed. The encoded payload is kept for a retry,
    /// and so is the pending instruction.
    pub fn fail(&mut self, error: &VisualizerError) -> Result<(), VisualizerError> {
        self.ensure_processing("record a failure")?;
        self.phase = Phase::Error;
        self.artifact = None;
        self.status_message = status_message_for(error);
        Ok(())
    }

    /// Clear every field and return to `Idle`.
    pub fn reset(&mut self) -> Result<(), VisualizerError> {
        self.ensure_not_processing("reset")?;
        *self = Self::default();
        Ok(())
    }
}

/// Map a generation-path error to the text shown to the user.
#[must_use]
pub fn status_message_for(error: &VisualizerError) -> String {
    match error {
        VisualizerError::BudgetExceeded(_) => STATUS_BUDGET_EXCEEDED.to_string(),
        VisualizerError::Encoding(_) => STATUS_GENERIC_FAILURE.to_string(),
        other => {
            let message = other.to_string();
            if message.trim().is_empty() {
                STATUS_GENERIC_FAILURE.to_string()
            } else {
                message
            }
        }
    }
}
