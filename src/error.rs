use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use warp::reply::Reply;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("could not encode or decode entries: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Entry not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Store failures are logged here and reach the caller only as a generic message.
    pub fn into_response(self) -> warp::reply::Response {
        let status = self.status_code();
        let error = match self {
            ApiError::Store(err) => {
                tracing::error!(error = %err, "store operation failed");
                String::from("Internal server error")
            }
            other => other.to_string(),
        };

        warp::reply::with_status(warp::reply::json(&ErrorBody { error }), status).into_response()
    }
}
