use axum::{
    body::{to_bytes, Body, Bytes},
    http::{header, Method, Request, StatusCode},
    Router,
};
use lumina::{
    render::SANDBOX_POLICY, server, Orchestrator, Phase, VisualizationClient, PDF_MEDIA_TYPE,
};
use lumina_sdk::testing::{MockGenerateResult, MockLanguageModel};
use serde_json::{json, Value};
use std::{io, sync::Arc, time::Duration};
use tokio::{test, time::timeout};
use tower::ServiceExt;

const PDF_BYTES: &[u8] = b"%PDF-1.4\n%%EOF";

fn setup() -> (Arc<MockLanguageModel>, Arc<Orchestrator>, Router) {
    let model = Arc::new(MockLanguageModel::new());
    let orchestrator = Arc::new(Orchestrator::new(VisualizationClient::new(model.clone())));
    let app = server::router(orchestrator.clone());
    (model, orchestrator, app)
}

fn enqueue_visualization(model: &MockLanguageModel, title: &str, html: &str) {
    model.enqueue_generate(MockGenerateResult::text(
        json!({ "title": title, "html": html }).to_string(),
    ));
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[test]
async fn session_starts_idle() {
    let (_model, _orchestrator, app) = setup();

    let (status, _, body) = send(&app, empty_request(Method::GET, "/session")).await;

    assert_eq!(status, StatusCode::OK);
    let view: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(view["phase"], json!("idle"));
    assert_eq!(view["surface_url"], json!("/surface/default"));
}

#[test]
async fn non_pdf_upload_is_unsupported_media_type() {
    let (model, orchestrator, app) = setup();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("hello"))
        .unwrap();
    let (status, _, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(body.contains("application/pdf"));
    assert_eq!(orchestrator.view().phase, Phase::Idle);
    assert!(model.tracked_generate_inputs().is_empty());
}

#[test]
async fn pdf_upload_is_accepted_and_generates_in_background() {
    let (model, orchestrator, app) = setup();
    enqueue_visualization(&model, "Attention", "<html>attn</html>");
    let mut receiver = orchestrator.subscribe();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/upload?instruction=self-attention")
        .header(header::CONTENT_TYPE, PDF_MEDIA_TYPE)
        .header("x-file-name", "attention.pdf")
        .body(Body::from(PDF_BYTES))
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    timeout(Duration::from_secs(5), async {
        while let Ok(view) = receiver.recv().await {
            if view.phase == Phase::Completed {
                break;
            }
        }
    })
    .await
    .unwrap();

    let view = orchestrator.view();
    assert_eq!(view.file_name.as_deref(), Some("attention.pdf"));
    assert_eq!(view.title.as_deref(), Some("Attention"));
}

#[test]
async fn unreadable_upload_body_is_bad_request() {
    let (model, orchestrator, app) = setup();

    let body = Body::from_stream(futures::stream::once(async {
        Err::<Bytes, io::Error>(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "client went away",
        ))
    }));
    let request = Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header(header::CONTENT_TYPE, PDF_MEDIA_TYPE)
        .body(body)
        .unwrap();
    let (status, _, _) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let view = orchestrator.view();
    assert_eq!(view.phase, Phase::Error);
    assert_eq!(view.status_message, "Generation failed.");
    assert!(!view.has_payload);
    assert!(model.tracked_generate_inputs().is_empty());
}

#[test]
async fn download_requires_an_artifact() {
    let (model, orchestrator, app) = setup();

    let (status, _, _) = send(&app, empty_request(Method::GET, "/download")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    enqueue_visualization(&model, "MemGPT: LLMs as OSes", "<html>mem</html>");
    orchestrator
        .upload("memgpt.pdf", PDF_MEDIA_TYPE, PDF_BYTES, None)
        .await
        .unwrap();

    let (status, headers, body) = send(&app, empty_request(Method::GET, "/download")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/html");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"memgpt__llms_as_oses.html\""
    );
    assert_eq!(body, "<html>mem</html>");
}

#[test]
async fn refine_with_blank_instruction_is_bad_request() {
    let (model, orchestrator, app) = setup();
    enqueue_visualization(&model, "T", "<html></html>");
    orchestrator
        .upload("a.pdf", PDF_MEDIA_TYPE, PDF_BYTES, None)
        .await
        .unwrap();

    let request = Request::builder()
        .method(Method::PUT)
        .uri("/instruction")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "instruction": "   " }).to_string()))
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&app, empty_request(Method::POST, "/refine")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(orchestrator.view().phase, Phase::Completed);
    assert_eq!(model.tracked_generate_inputs().len(), 1);
}

#[test]
async fn refine_before_upload_is_conflict() {
    let (_model, orchestrator, app) = setup();
    orchestrator.set_instruction("anything").unwrap();

    let (status, _, _) = send(&app, empty_request(Method::POST, "/refine")).await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[test]
async fn blobs_are_sandboxed_and_released_on_reset() {
    let (model, orchestrator, app) = setup();
    enqueue_visualization(&model, "T", "<html><script>1</script></html>");
    orchestrator
        .upload("a.pdf", PDF_MEDIA_TYPE, PDF_BYTES, None)
        .await
        .unwrap();
    let url = orchestrator.view().surface_url;

    let (status, headers, body) = send(&app, empty_request(Method::GET, &url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_SECURITY_POLICY], SANDBOX_POLICY);
    assert_eq!(body, "<html><script>1</script></html>");

    let (status, _, _) = send(&app, empty_request(Method::POST, "/reset")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&app, empty_request(Method::GET, &url)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, headers, _) = send(&app, empty_request(Method::GET, "/surface/default")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_SECURITY_POLICY], SANDBOX_POLICY);
}
