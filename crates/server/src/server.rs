//! HTTP server for the Aperture classification service
//!
//! Built on hyper. Endpoints:
//!
//! - `POST /predict` - classify an uploaded image, optionally with a
//!   Grad-CAM overlay (`?gradcam=true`, `?k=`, `?class=`)
//! - `GET /labels` - the full ordered label list fixed at load time
//! - `GET /health` - static liveness indicator
//! - `GET /metrics` - JSON snapshot of the request counters
//! - `GET /ui` - single-page browser UI proxying to `/predict`
//!
//! Requests are independent units of work: the engine is shared read-only
//! behind an `Arc`, inference runs on the blocking thread pool, and no
//! request leaves state behind for the next one.

use crate::config::ServerConfig;
use crate::metrics::MetricsCollector;
use crate::overlay::render_overlay;
use aperture_vision::{ErrorResponse, Prediction, VisionEngine, VisionError, VisionResult};
use base64::Engine as _;
use http::{Method, StatusCode};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

const UI_HTML: &str = include_str!("../assets/ui.html");

/// Response body for `POST /predict`
#[derive(Debug, Serialize)]
struct PredictResponse {
    predictions: Vec<Prediction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gradcam_png_b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gradcam_for_class: Option<usize>,
}

/// Response body for `GET /labels`
#[derive(Debug, Serialize)]
struct LabelsResponse<'a> {
    classes: &'a [String],
}

/// Response body for `GET /health`
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Query parameters accepted by `POST /predict`
#[derive(Debug, Default, PartialEq, Eq)]
struct PredictParams {
    k: Option<usize>,
    gradcam: bool,
    class: Option<usize>,
}

/// Shared per-request context
struct AppState {
    engine: Arc<VisionEngine>,
    metrics: Arc<MetricsCollector>,
    config: ServerConfig,
    default_topk: usize,
}

/// HTTP front end over a loaded [`VisionEngine`]
pub struct ApertureServer {
    state: Arc<AppState>,
}

impl ApertureServer {
    /// Create a server around a loaded engine
    #[must_use]
    pub fn new(engine: Arc<VisionEngine>, config: ServerConfig, default_topk: usize) -> Self {
        let state = Arc::new(AppState {
            engine,
            metrics: Arc::new(MetricsCollector::new()),
            config,
            default_topk,
        });
        Self { state }
    }

    /// Handle to the request counters
    #[must_use]
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.state.metrics)
    }

    /// Start serving requests, draining connections gracefully once the
    /// shutdown future resolves (the binary passes ctrl-c here).
    #[instrument(skip_all)]
    pub async fn start(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send,
    ) -> VisionResult<()> {
        let bind_addr = self.state.config.listen_addr;

        let state = Arc::clone(&self.state);
        let make_svc = make_service_fn(move |_conn| {
            let state = Arc::clone(&state);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    handle_request(req, Arc::clone(&state))
                }))
            }
        });

        let server = Server::try_bind(&bind_addr)
            .map_err(|e| {
                error!(error = %e, bind_addr = %bind_addr, "failed to bind");
                VisionError::Configuration(format!("cannot bind {bind_addr}: {e}"))
            })?
            .serve(make_svc)
            .with_graceful_shutdown(async {
                shutdown.await;
                info!("shutdown signal received");
            });

        info!(bind_addr = %bind_addr, "HTTP server listening");
        server
            .await
            .map_err(|e| VisionError::Configuration(format!("server error: {e}")))?;

        info!("HTTP server shut down");
        Ok(())
    }
}

#[instrument(skip_all, fields(method = ?req.method(), path = req.uri().path()))]
async fn handle_request(
    req: Request<Body>,
    state: Arc<AppState>,
) -> Result<Response<Body>, Infallible> {
    state.metrics.record_request();

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (&method, path.as_str()) {
        (&Method::POST, "/predict") => handle_predict(req, &state).await,
        (&Method::GET, "/labels") => handle_labels(&state),
        (&Method::GET, "/health") => handle_health(),
        (&Method::GET, "/metrics") => handle_metrics(&state),
        (&Method::GET, "/ui") | (&Method::GET, "/") if state.config.serve_ui => handle_ui(),
        _ => {
            warn!(method = %method, path = %path, "request to unknown endpoint");
            plain_response(StatusCode::NOT_FOUND, "Not Found")
        }
    };

    state.metrics.record_status(response.status().as_u16());
    debug!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        "request completed"
    );

    Ok(response)
}

async fn handle_predict(req: Request<Body>, state: &Arc<AppState>) -> Response<Body> {
    let params = match parse_predict_params(req.uri().query()) {
        Ok(params) => params,
        Err(e) => return error_response(&e),
    };

    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            return error_response(&VisionError::InputDecode("unreadable body".to_string()));
        }
    };
    if body.is_empty() {
        return error_response(&VisionError::InputDecode("empty body".to_string()));
    }
    if body.len() > state.config.max_upload_bytes {
        return plain_response(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large");
    }

    // Decoding sniffs the bytes; the Content-Type header is advisory only.
    let img = match image::load_from_memory(&body) {
        Ok(img) => img,
        Err(e) => {
            debug!(error = %e, "image decode failed");
            return error_response(&VisionError::InputDecode(e.to_string()));
        }
    };

    let k = params.k.unwrap_or(state.default_topk);
    let engine = Arc::clone(&state.engine);
    let gradcam = params.gradcam;
    let class = params.class;

    // Inference is CPU-bound; keep it off the async workers.
    let result = tokio::task::spawn_blocking(move || -> VisionResult<PredictResponse> {
        let predictions = engine.predict_topk(&img, k)?;

        let (gradcam_png_b64, gradcam_for_class) = if gradcam {
            let saliency = engine.explain(&img, class)?;
            let png = render_overlay(&saliency.map, &img)?;
            let encoded = base64::engine::general_purpose::STANDARD.encode(png);
            (Some(encoded), Some(saliency.class_index))
        } else {
            (None, None)
        };

        Ok(PredictResponse {
            predictions,
            gradcam_png_b64,
            gradcam_for_class,
        })
    })
    .await;

    match result {
        Ok(Ok(response)) => {
            state.metrics.record_prediction();
            if response.gradcam_for_class.is_some() {
                state.metrics.record_explanation();
            }
            json_response(StatusCode::OK, &response)
        }
        Ok(Err(e)) => {
            if matches!(e, VisionError::CaptureMissing) {
                error!(error = %e, "explanation layer produced no gradient");
            }
            error_response(&e)
        }
        Err(e) => {
            error!(error = %e, "inference task panicked or was cancelled");
            plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn handle_labels(state: &Arc<AppState>) -> Response<Body> {
    json_response(
        StatusCode::OK,
        &LabelsResponse {
            classes: state.engine.labels().as_slice(),
        },
    )
}

fn handle_health() -> Response<Body> {
    json_response(StatusCode::OK, &HealthResponse { status: "ok" })
}

fn handle_metrics(state: &Arc<AppState>) -> Response<Body> {
    json_response(StatusCode::OK, &state.metrics.snapshot())
}

fn handle_ui() -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/html; charset=utf-8")
        .body(Body::from(UI_HTML))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Parse `?k=&gradcam=&class=` with explicit failures on malformed values.
fn parse_predict_params(query: Option<&str>) -> VisionResult<PredictParams> {
    let mut params = PredictParams::default();
    let Some(query) = query else {
        return Ok(params);
    };

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "k" => {
                params.k = Some(value.parse().map_err(|_| {
                    VisionError::InvalidArgument(format!("k must be a positive integer, got '{value}'"))
                })?);
            }
            "gradcam" => {
                params.gradcam = match value {
                    "true" | "1" => true,
                    "false" | "0" | "" => false,
                    other => {
                        return Err(VisionError::InvalidArgument(format!(
                            "gradcam must be true or false, got '{other}'"
                        )))
                    }
                };
            }
            "class" => {
                params.class = Some(value.parse().map_err(|_| {
                    VisionError::InvalidArgument(format!(
                        "class must be a non-negative integer, got '{value}'"
                    ))
                })?);
            }
            _ => {}
        }
    }

    Ok(params)
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    match serde_json::to_string(body) {
        Ok(json) => Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Body::from(json))
            .unwrap_or_else(|_| Response::new(Body::empty())),
        Err(e) => {
            error!(error = %e, "failed to serialize response");
            plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn plain_response(status: StatusCode, message: &'static str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Body::from(message))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn error_response(err: &VisionError) -> Response<Body> {
    let status =
        StatusCode::from_u16(err.to_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, &ErrorResponse::from(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aperture_vision::testing::test_engine;
    use base64::Engine as _;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            width,
            height,
            image::Rgb([200, 200, 200]),
        ));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            engine: Arc::new(test_engine().unwrap()),
            metrics: Arc::new(MetricsCollector::new()),
            config: ServerConfig::default(),
            default_topk: 5,
        })
    }

    fn request(method: Method, uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_parse_predict_params() {
        assert_eq!(
            parse_predict_params(Some("gradcam=true&k=3&class=7")).unwrap(),
            PredictParams {
                k: Some(3),
                gradcam: true,
                class: Some(7),
            }
        );
        assert_eq!(parse_predict_params(None).unwrap(), PredictParams::default());
        assert!(parse_predict_params(Some("k=minus-one")).is_err());
        assert!(parse_predict_params(Some("gradcam=maybe")).is_err());
        assert!(parse_predict_params(Some("class=1.5")).is_err());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = handle_request(request(Method::GET, "/health", Vec::new()), test_state())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_labels_endpoint() {
        let response = handle_request(request(Method::GET, "/labels", Vec::new()), test_state())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["classes"].as_array().unwrap().len(), 10);
        assert_eq!(json["classes"][0], "class-0");
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_404() {
        let response = handle_request(request(Method::GET, "/nope", Vec::new()), test_state())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_predict_returns_topk() {
        let response = handle_request(
            request(Method::POST, "/predict", png_bytes(64, 64)),
            test_state(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        let predictions = json["predictions"].as_array().unwrap();
        assert_eq!(predictions.len(), 5);
        assert!(json.get("gradcam_png_b64").is_none());
    }

    #[tokio::test]
    async fn test_predict_rejects_undecodable_image() {
        let response = handle_request(
            request(Method::POST, "/predict", b"not an image".to_vec()),
            test_state(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "input_decode_error");
    }

    #[tokio::test]
    async fn test_predict_rejects_invalid_k() {
        let response = handle_request(
            request(Method::POST, "/predict?k=0", png_bytes(64, 64)),
            test_state(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = handle_request(
            request(Method::POST, "/predict?k=11", png_bytes(64, 64)),
            test_state(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_predict_with_gradcam_returns_png_overlay() {
        let state = test_state();
        let response = handle_request(
            request(Method::POST, "/predict?gradcam=true", png_bytes(64, 64)),
            Arc::clone(&state),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        let encoded = json["gradcam_png_b64"].as_str().unwrap();
        let png = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n']);

        // The explained class defaults to the model's own top prediction.
        let top_label = json["predictions"][0]["label"].as_str().unwrap();
        let explained = json["gradcam_for_class"].as_u64().unwrap();
        assert_eq!(format!("class-{explained}"), top_label);

        assert_eq!(state.metrics.snapshot().explanations, 1);
    }

    #[tokio::test]
    async fn test_predict_rejects_oversized_body() {
        let state = Arc::new(AppState {
            engine: Arc::new(test_engine().unwrap()),
            metrics: Arc::new(MetricsCollector::new()),
            config: ServerConfig {
                max_upload_bytes: 1024,
                ..Default::default()
            },
            default_topk: 5,
        });

        let response = handle_request(
            request(Method::POST, "/predict", vec![0u8; 4096]),
            state,
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_ui_served() {
        let response = handle_request(request(Method::GET, "/ui", Vec::new()), test_state())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert!(std::str::from_utf8(&bytes).unwrap().contains("Grad-CAM"));
    }
}
