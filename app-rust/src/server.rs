use crate::{
    orchestrator::{Orchestrator, SessionView},
    render::{DEFAULT_DOCUMENT, HTML_MEDIA_TYPE, SANDBOX_POLICY},
    VisualizerError,
};
use async_stream::stream;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{
        header::{self, InvalidHeaderValue},
        HeaderMap, HeaderValue, Method, StatusCode,
    },
    response::{
        sse::{Event, KeepAlive},
        Html, IntoResponse, Response, Sse,
    },
    routing::{get, post, put},
    Json, Router,
};
use futures::{Stream, TryStreamExt};
use serde::Deserialize;
use serde_json::json;
use std::{convert::Infallible, io, sync::Arc, time::Duration};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::io::StreamReader;
use tower_http::cors::CorsLayer;

const INDEX_PAGE: &str = include_str!("../static/index.html");
const DEFAULT_FILE_NAME: &str = "document.pdf";
const FILE_NAME_HEADER: &str = "x-file-name";

impl IntoResponse for VisualizerError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidInput(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Encoding(_) | Self::EmptyInstruction => StatusCode::BAD_REQUEST,
            Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::BudgetExceeded(_) | Self::EmptyGeneration | Self::Generation(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Deserialize)]
struct UploadQuery {
    instruction: Option<String>,
}

#[derive(Deserialize)]
struct InstructionBody {
    instruction: String,
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/session", get(session_handler))
        .route("/events", get(events_handler))
        .route("/upload", post(upload_handler))
        .route("/instruction", put(instruction_handler))
        .route("/refine", post(refine_handler))
        .route("/reset", post(reset_handler))
        .route("/download", get(download_handler))
        .route("/surface/default", get(default_document_handler))
        .route("/blob/{id}", get(blob_handler))
        .with_state(orchestrator)
}

/// Allow a separately hosted front end at `app_url` to call the API.
pub fn cors_layer(app_url: &str) -> Result<CorsLayer, InvalidHeaderValue> {
    Ok(CorsLayer::new()
        .allow_origin([app_url.parse::<HeaderValue>()?])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static(FILE_NAME_HEADER),
        ])
        .allow_credentials(true))
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

async fn session_handler(State(orchestrator): State<Arc<Orchestrator>>) -> Json<SessionView> {
    Json(orchestrator.view())
}

async fn events_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut receiver = orchestrator.subscribe();
    let initial = orchestrator.view();

    let stream = stream! {
        yield Ok::<Event, Infallible>(session_event(&initial));
        loop {
            match receiver.recv().await {
                Ok(view) => {
                    yield Ok(session_event(&view));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn session_event(view: &SessionView) -> Event {
    Event::default()
        .event("session")
        .json_data(view)
        .unwrap_or_else(|error| Event::default().event("error").data(error.to_string()))
}

async fn upload_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<SessionView>), VisualizerError> {
    let media_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let file_name = headers
        .get(FILE_NAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(DEFAULT_FILE_NAME);

    let reader = StreamReader::new(body.into_data_stream().map_err(io::Error::other));
    let job = orchestrator
        .prepare_upload(file_name, media_type, reader, query.instruction.as_deref())
        .await?;

    spawn_generation(&orchestrator, job);
    Ok((StatusCode::ACCEPTED, Json(orchestrator.view())))
}

async fn instruction_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(body): Json<InstructionBody>,
) -> Result<Json<SessionView>, VisualizerError> {
    orchestrator.set_instruction(&body.instruction).map(Json)
}

async fn refine_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> Result<(StatusCode, Json<SessionView>), VisualizerError> {
    let job = orchestrator.prepare_refine()?;
    spawn_generation(&orchestrator, job);
    Ok((StatusCode::ACCEPTED, Json(orchestrator.view())))
}

async fn reset_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> Result<Json<SessionView>, VisualizerError> {
    orchestrator.reset().map(Json)
}

async fn download_handler(State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    let Some(download) = orchestrator.download() else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No visualization to download" })),
        )
            .into_response();
    };

    (
        [
            (header::CONTENT_TYPE, download.media_type.to_string()),
            (header::CONTENT_DISPOSITION, download.content_disposition()),
        ],
        download.body,
    )
        .into_response()
}

async fn default_document_handler() -> Response {
    sandboxed_document(DEFAULT_DOCUMENT.to_string(), HTML_MEDIA_TYPE)
}

async fn blob_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Response {
    match orchestrator.blobs().get(&id) {
        Some(blob) => sandboxed_document(blob.body.to_string(), blob.media_type),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn sandboxed_document(body: String, media_type: &'static str) -> Response {
    (
        [
            (header::CONTENT_TYPE, media_type),
            (header::CONTENT_SECURITY_POLICY, SANDBOX_POLICY),
            (header::CACHE_CONTROL, "no-store"),
        ],
        body,
    )
        .into_response()
}

fn spawn_generation(orchestrator: &Arc<Orchestrator>, job: crate::GenerationJob) {
    let orchestrator = Arc::clone(orchestrator);
    tokio::spawn(async move {
        // Failures are recorded on the session and published as events.
        let _ = orchestrator.run(job).await;
    });
}
