use crate::{
    encoding::encode_reader,
    export::HtmlDownload,
    generation::VisualizationClient,
    render::{BlobStore, RenderSurface},
    session::{Artifact, GenerationRequest, Phase, Session, SourceFile},
    VisualizerError, PDF_MEDIA_TYPE,
};
use serde::Serialize;
use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::{io::AsyncRead, sync::broadcast};
use tracing::Instrument;

const EVENT_CAPACITY: usize = 64;

/// Serializable snapshot of the session, published after every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub phase: Phase,
    pub status_message: String,
    pub file_name: Option<String>,
    pub title: Option<String>,
    pub pending_instruction: String,
    pub has_payload: bool,
    pub output_size_kb: Option<f64>,
    pub surface_url: String,
    pub model_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Upload,
    Refine,
}

/// A generation call that passed every guard and is ready to run.
#[derive(Debug)]
pub struct GenerationJob {
    pub kind: JobKind,
    request: GenerationRequest,
}

impl GenerationJob {
    #[must_use]
    pub fn instruction(&self) -> &str {
        &self.request.instruction
    }
}

struct Inner {
    session: Session,
    surface: RenderSurface,
}

/// Drives the session: turns user triggers into transitions, runs the
/// generation call and keeps the render surface in sync.
pub struct Orchestrator {
    client: VisualizationClient,
    blobs: Arc<BlobStore>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<SessionView>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(client: VisualizationClient) -> Self {
        let blobs = BlobStore::new();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            client,
            inner: Mutex::new(Inner {
                session: Session::new(),
                surface: RenderSurface::new(blobs.clone()),
            }),
            blobs,
            events,
        }
    }

    #[must_use]
    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionView> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn view(&self) -> SessionView {
        self.with_inner(|inner| self.snapshot(inner))
    }

    /// The current artifact packaged for saving, if any.
    #[must_use]
    pub fn download(&self) -> Option<HtmlDownload> {
        self.with_inner(|inner| inner.session.artifact().map(HtmlDownload::from_artifact))
    }

    pub fn set_instruction(&self, instruction: &str) -> Result<SessionView, VisualizerError> {
        self.mutate(|inner| inner.session.set_instruction(instruction))
    }

    pub fn reset(&self) -> Result<SessionView, VisualizerError> {
        self.mutate(|inner| {
            inner.session.reset()?;
            inner.surface.clear();
            Ok(())
        })
    }

    /// Validate and encode a newly selected document.
    ///
    /// A non-PDF is rejected before any state changes. When `instruction`
    /// is given it becomes the pending instruction for this upload.
    pub async fn prepare_upload<R>(
        &self,
        file_name: &str,
        media_type: &str,
        reader: R,
        instruction: Option<&str>,
    ) -> Result<GenerationJob, VisualizerError>
    where
        R: AsyncRead + Unpin,
    {
        if !is_pdf(media_type) {
            tracing::warn!(file_name, media_type, "rejected non-pdf upload");
            return Err(VisualizerError::InvalidInput(format!(
                "Expected {PDF_MEDIA_TYPE}, got {media_type}"
            )));
        }

        self.mutate(|inner| {
            if let Some(instruction) = instruction {
                inner.session.set_instruction(instruction)?;
            }
            inner.session.select_file(SourceFile {
                name: file_name.to_string(),
                media_type: PDF_MEDIA_TYPE.to_string(),
            })?;
            inner.surface.clear();
            Ok(())
        })?;
        let guard = ProcessingGuard::new(self, upload_aborted);

        let payload = match encode_reader(reader, PDF_MEDIA_TYPE).await {
            Ok(payload) => payload,
            Err(error) => {
                guard.disarm();
                tracing::error!(file_name, error = %error, "failed to encode document");
                self.record_failure(&error);
                return Err(error);
            }
        };
        tracing::info!(file_name, encoded_bytes = payload.len(), "document encoded");

        let mut request = None;
        self.mutate(|inner| {
            inner.session.store_payload(payload)?;
            request = Some(inner.session.begin_generation()?);
            Ok(())
        })?;
        guard.disarm();

        request
            .map(|request| GenerationJob {
                kind: JobKind::Upload,
                request,
            })
            .ok_or(VisualizerError::InvalidTransition {
                action: "start generation",
                phase: Phase::Processing,
            })
    }

    /// Re-run generation on the stored document with the pending instruction.
    pub fn prepare_refine(&self) -> Result<GenerationJob, VisualizerError> {
        let mut request = None;
        self.mutate(|inner| {
            request = Some(inner.session.begin_refine()?);
            inner.surface.clear();
            Ok(())
        })?;

        request
            .map(|request| GenerationJob {
                kind: JobKind::Refine,
                request,
            })
            .ok_or(VisualizerError::InvalidTransition {
                action: "refine the visualization",
                phase: Phase::Processing,
            })
    }

    /// Perform the single generation call of `job` and record its outcome.
    pub async fn run(&self, job: GenerationJob) -> Result<Artifact, VisualizerError> {
        let GenerationJob { kind, request } = job;
        let guard = ProcessingGuard::new(self, generation_aborted);
        let span = tracing::info_span!("generation", kind = ?kind);

        let sink = |status: &str| self.report_progress(status);
        let result = self
            .client
            .generate(&request.payload, &request.instruction, Some(&sink))
            .instrument(span)
            .await;

        match result {
            Ok(visualization) => {
                let mut artifact = None;
                self.mutate(|inner| {
                    let completed = inner
                        .session
                        .complete(visualization, &request.instruction)?
                        .clone();
                    inner.surface.show(&completed.html);
                    artifact = Some(completed);
                    Ok(())
                })?;
                guard.disarm();
                let artifact = artifact.ok_or(VisualizerError::InvalidTransition {
                    action: "complete generation",
                    phase: Phase::Completed,
                })?;
                tracing::info!(
                    title = %artifact.title,
                    size_kb = artifact.size_kb(),
                    "visualization ready"
                );
                Ok(artifact)
            }
            Err(error) => {
                guard.disarm();
                tracing::error!(kind = ?kind, error = %error, "generation failed");
                self.record_failure(&error);
                Err(error)
            }
        }
    }

    /// Select, encode and generate in one step.
    pub async fn upload<R>(
        &self,
        file_name: &str,
        media_type: &str,
        reader: R,
        instruction: Option<&str>,
    ) -> Result<Artifact, VisualizerError>
    where
        R: AsyncRead + Unpin,
    {
        let job = self
            .prepare_upload(file_name, media_type, reader, instruction)
            .await?;
        self.run(job).await
    }

    pub async fn refine(&self) -> Result<Artifact, VisualizerError> {
        let job = self.prepare_refine()?;
        self.run(job).await
    }

    fn report_progress(&self, status: &str) {
        self.with_inner(|inner| {
            if inner.session.report_progress(status) {
                self.publish(inner);
            }
        });
    }

    fn record_failure(&self, error: &VisualizerError) {
        self.with_inner(|inner| {
            if let Err(transition) = inner.session.fail(error) {
                tracing::warn!(error = %transition, "could not record failure");
                return;
            }
            inner.surface.clear();
            self.publish(inner);
        });
    }

    /// Apply a transition and publish the new snapshot if it succeeded.
    fn mutate<F>(&self, f: F) -> Result<SessionView, VisualizerError>
    where
        F: FnOnce(&mut Inner) -> Result<(), VisualizerError>,
    {
        self.with_inner(|inner| {
            f(inner)?;
            Ok(self.publish(inner))
        })
    }

    fn publish(&self, inner: &Inner) -> SessionView {
        let view = self.snapshot(inner);
        // No subscribers is not an error.
        let _ = self.events.send(view.clone());
        view
    }

    fn snapshot(&self, inner: &Inner) -> SessionView {
        let session = &inner.session;
        SessionView {
            phase: session.phase(),
            status_message: session.status_message().to_string(),
            file_name: session.source_file().map(|file| file.name.clone()),
            title: session.artifact().map(|artifact| artifact.title.clone()),
            pending_instruction: session.pending_instruction().to_string(),
            has_payload: session.encoded_payload().is_some(),
            output_size_kb: session.artifact().map(Artifact::size_kb),
            surface_url: inner.surface.current_url(),
            model_id: self.client.model_id(),
        }
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Moves the session to `Error` if dropped while still armed, so a future
/// cancelled mid-`Processing` cannot leave the session stuck there.
struct ProcessingGuard<'a> {
    orchestrator: &'a Orchestrator,
    abort: Option<fn() -> VisualizerError>,
}

impl<'a> ProcessingGuard<'a> {
    fn new(orchestrator: &'a Orchestrator, abort: fn() -> VisualizerError) -> Self {
        Self {
            orchestrator,
            abort: Some(abort),
        }
    }

    fn disarm(mut self) {
        self.abort = None;
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            let error = abort();
            tracing::warn!(error = %error, "operation dropped while processing");
            self.orchestrator.record_failure(&error);
        }
    }
}

fn upload_aborted() -> VisualizerError {
    VisualizerError::Encoding(io::Error::other("upload aborted"))
}

fn generation_aborted() -> VisualizerError {
    VisualizerError::Generation("Generation was aborted before it finished.".into())
}

fn is_pdf(media_type: &str) -> bool {
    media_type
        .split(';')
        .next()
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(PDF_MEDIA_TYPE))
}

#[cfg(test)]
mod tests {
    use super::is_pdf;

    #[test]
    fn recognises_pdf_media_types() {
        assert!(is_pdf("application/pdf"));
        assert!(is_pdf("Application/PDF; charset=binary"));
        assert!(!is_pdf("text/plain"));
        assert!(!is_pdf(""));
    }
}
