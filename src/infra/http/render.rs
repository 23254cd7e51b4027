use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::{
    application::{
        error::HttpError,
        render::{RenderBody, RenderResult, RenderService},
    },
    domain::request::RenderParams,
};

use super::middleware::{log_responses, set_request_context};

const SOURCE: &str = "infra::http::render";

#[derive(Clone)]
pub struct HttpState {
    pub renderer: Arc<RenderService>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(render))
        .route("/_health/pool", get(pool_health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn render(
    State(state): State<HttpState>,
    Query(params): Query<RenderParams>,
) -> Result<Response, HttpError> {
    let result = state.renderer.render(&params).await?;
    build_render_response(result)
}

fn build_render_response(result: RenderResult) -> Result<Response, HttpError> {
    // Echoed verbatim: `?format=PNG` answers with `Content-Type: PNG`.
    let content_type = HeaderValue::from_str(&result.content_type).map_err(|err| {
        HttpError::from_error(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            &err,
        )
    })?;
    let content_length = result.content_length();

    let body = match result.body {
        RenderBody::Image(bytes) => Body::from(bytes),
        RenderBody::Document(stream) => Body::from_stream(stream),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .header(CONTENT_LENGTH, content_length)
        .header(CACHE_CONTROL, "no-store")
        .body(body)
        .map_err(|err| {
            HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                &err,
            )
        })
}

async fn pool_health(State(state): State<HttpState>) -> Response {
    let status = state.renderer.pool().status();
    let code = if status.draining {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(status)).into_response()
}
