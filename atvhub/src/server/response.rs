use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use serde_json::{json, Value};

/// Error body shared by every JSON route: `{ success: false, error, message? }`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: Status,
    pub error: String,
    pub message: Option<String>,
}

pub type ApiResult<T = Value> = Result<Json<T>, ApiError>;

impl ApiError {
    pub fn new(status: Status, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            message: None,
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(Status::BadRequest, error)
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(Status::NotFound, error)
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(Status::InternalServerError, error)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn body(&self) -> Value {
        let mut body = json!({ "success": false, "error": self.error });
        if let Some(message) = &self.message {
            body["message"] = Value::String(message.clone());
        }
        body
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status;
        response::Response::build_from(Json(self.body()).respond_to(req)?)
            .status(status)
            .ok()
    }
}

/// Log the cause and turn it into a 500 with a fixed public error.
pub fn internal<E: std::fmt::Display>(error: &'static str) -> impl FnOnce(E) -> ApiError {
    move |e| {
        tracing::error!("{}: {:#}", error, e);
        ApiError::internal(error)
    }
}
