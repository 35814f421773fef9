use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Serialize;
use std::borrow::Cow;

#[derive(Debug)]
pub enum AppError {
    InternalServerError(anyhow::Error),
    ResponseStatusError(StatusCode, Cow<'static, str>),
    /// Rejected form input. The form is re-rendered with the message.
    Invalid(Cow<'static, str>),
    /// No usable session; the browser is sent to the login page.
    LoginRequired { expired: bool },
}

pub type AppResult<T> = Result<T, AppError>;

/// Body of a re-rendered form.
#[derive(Serialize, Default)]
pub struct FormResponse {
    pub error: Option<Cow<'static, str>>,
    pub message: Option<Cow<'static, str>>,
}

impl FormResponse {
    pub fn message(message: impl Into<Cow<'static, str>>) -> Json<FormResponse> {
        Json(FormResponse {
            error: None,
            message: Some(message.into()),
        })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct AppErrorResponse {
            status: u16,
            message: Cow<'static, str>,
        }

        match self {
            AppError::InternalServerError(err) => {
                tracing::error!(error = ?err, "request failed");
                AppError::from(StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong!")
                    .into_response()
            }
            AppError::ResponseStatusError(code, s) => (
                code,
                Json(AppErrorResponse {
                    status: code.as_u16(),
                    message: s,
                }),
            )
                .into_response(),
            AppError::Invalid(s) => (
                StatusCode::OK,
                Json(FormResponse {
                    error: Some(s),
                    message: None,
                }),
            )
                .into_response(),
            AppError::LoginRequired { expired: false } => Redirect::to("/login").into_response(),
            AppError::LoginRequired { expired: true } => {
                Redirect::to("/login?expired=1").into_response()
            }
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(e: E) -> AppError {
        AppError::InternalServerError(e.into())
    }
}

impl AppError {
    pub fn from(code: StatusCode, s: impl Into<Cow<'static, str>>) -> AppError {
        AppError::ResponseStatusError(code, s.into())
    }

    pub fn invalid(s: impl Into<Cow<'static, str>>) -> AppError {
        AppError::Invalid(s.into())
    }

    pub fn forbidden() -> AppError {
        AppError::from(StatusCode::FORBIDDEN, "Forbidden")
    }

    pub fn not_found(what: &str) -> AppError {
        AppError::from(StatusCode::NOT_FOUND, format!("{what} not found"))
    }

    pub fn conflict(s: impl Into<Cow<'static, str>>) -> AppError {
        AppError::from(StatusCode::CONFLICT, s)
    }
}
