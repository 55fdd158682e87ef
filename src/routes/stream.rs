use axum::body::Body;
use axum::extract::Path;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::error::{internal_error, AppError, AppResult};
use crate::models::AuthConfig;
use crate::state::AppState;

/// Proxies the camera's live endpoint byte-for-byte so the dashboard never
/// needs direct network access to the camera (spec.md §4.10 "proxies the
/// camera MJPEG stream"), grounded on the teacher's
/// `routes/setup_daemon.rs::proxy` request-forwarding shape, generalized
/// from a buffered request/response to a streamed `Body::from_stream` the
/// way `routes/backups_exports.rs::response_stream_from_file` streams a
/// file instead of buffering it.
#[utoipa::path(
    get,
    path = "/api/stream/{meter}",
    tag = "stream",
    params(("meter" = String, Path, description = "Meter name")),
    responses(
        (status = 200, description = "Proxied camera stream"),
        (status = 404, description = "Unknown meter"),
        (status = 502, description = "Camera unreachable")
    )
)]
pub(crate) async fn stream_camera(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path(meter): Path<String>,
) -> AppResult<Response> {
    let config = state.config.current();
    let meter = config
        .meter(&meter)
        .ok_or_else(|| AppError::not_found(format!("unknown meter '{meter}'")))?;

    let mut request = state.http.get(&meter.camera.endpoint_url);
    if let AuthConfig::Basic { user, pass } = &meter.camera.auth {
        request = request.basic_auth(user, Some(pass));
    }

    let upstream = request.send().await.map_err(internal_error)?;
    if !upstream.status().is_success() {
        return Err(AppError::with_status(
            crate::error::ErrorKind::NetworkError,
            StatusCode::BAD_GATEWAY,
            format!("camera returned HTTP {}", upstream.status()),
        ));
    }

    let content_type = upstream
        .headers()
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| "image/jpeg".parse().expect("static content-type parses"));
    let stream = upstream.bytes_stream();

    let mut response = Response::new(Body::from_stream(stream));
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    Ok(response.into_response())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/stream/{meter}", get(stream_camera))
}
