use axum::{
    Json,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// ApiResponse
///
/// The success envelope: `{ "code": 0, "msg": ..., "data": ... }`, plus `total`
/// for paginated lists.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self::with_message("success", data)
    }

    pub fn with_message(msg: &str, data: T) -> Self {
        Self {
            code: 0,
            msg: msg.to_string(),
            data: Some(data),
            total: None,
        }
    }

    pub fn page(items: T, total: i64) -> Self {
        Self {
            total: Some(total),
            ..Self::success(items)
        }
    }
}

impl ApiResponse<()> {
    pub fn message(msg: &str) -> Self {
        Self {
            code: 0,
            msg: msg.to_string(),
            data: None,
            total: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}
