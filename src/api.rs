//! HTTP/JSON front end for the store.
//!
//! Every handler parses the request, calls exactly one [`Store`] operation
//! and wraps the result in a `{"message": .., "data": ..}` envelope.
//!
//! # Endpoints
//!
//! - `GET    /users`      - list every user
//! - `POST   /users`      - create a user from a partial record
//! - `GET    /users/:id`  - fetch one user
//! - `PUT    /users/:id`  - merge a partial record into a user
//! - `DELETE /users/:id`  - remove a user and return it

use crate::error::StoreError;
use crate::store::Store;
use crate::types::{User, UserId};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Response envelope shared by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct Message<T> {
    pub message: String,
    pub data: Option<T>,
}

impl<T> Message<T> {
    pub fn ok(data: T) -> Self {
        Self {
            message: "OK".to_string(),
            data: Some(data),
        }
    }
}

/// Errors produced while serving a request.
#[derive(Debug)]
pub enum ApiError {
    /// The path segment is not a user id.
    BadId(String),
    /// The body is not a user record.
    BadPayload(String),
    /// The store refused the operation.
    Store(StoreError),
    /// The blocking task running the operation died.
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadId(_) | ApiError::BadPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadId(raw) => format!("invalid user id '{}'", raw),
            ApiError::BadPayload(reason) => format!("invalid user payload: {}", reason),
            ApiError::Store(e) => e.to_string(),
            ApiError::Internal(reason) => reason.clone(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadPayload(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self.message(), "request failed");
        }
        let body = Json(Message::<()> {
            message: self.message(),
            data: None,
        });
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<Json<Message<T>>, ApiError>;

/// Build the router over a shared store.
pub fn router(store: Arc<Store>) -> Router {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

fn parse_id(raw: &str) -> Result<UserId, ApiError> {
    raw.parse().map_err(|_| ApiError::BadId(raw.to_string()))
}

/// Run a store call off the async workers.
///
/// Mutations may flush to disk, and reads can wait on the table lock behind
/// a queued writer while a flush is encoding.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("store task failed: {}", e)))?
        .map_err(ApiError::from)
}

async fn list_users(State(store): State<Arc<Store>>) -> ApiResult<Vec<User>> {
    let users = blocking(move || Ok(store.list())).await?;
    Ok(Json(Message::ok(users)))
}

async fn get_user(State(store): State<Arc<Store>>, Path(id): Path<String>) -> ApiResult<User> {
    let id = parse_id(&id)?;
    let user = blocking(move || store.get(id)).await?;
    Ok(Json(Message::ok(user)))
}

async fn create_user(
    State(store): State<Arc<Store>>,
    payload: Result<Json<User>, JsonRejection>,
) -> ApiResult<User> {
    let Json(draft) = payload?;
    let user = blocking(move || store.create(draft)).await?;
    Ok(Json(Message::ok(user)))
}

async fn update_user(
    State(store): State<Arc<Store>>,
    Path(id): Path<String>,
    payload: Result<Json<User>, JsonRejection>,
) -> ApiResult<User> {
    let id = parse_id(&id)?;
    let Json(patch) = payload?;
    let user = blocking(move || store.update(id, &patch)).await?;
    Ok(Json(Message::ok(user)))
}

async fn delete_user(State(store): State<Arc<Store>>, Path(id): Path<String>) -> ApiResult<User> {
    let id = parse_id(&id)?;
    let user = blocking(move || store.delete(id)).await?;
    Ok(Json(Message::ok(user)))
}
