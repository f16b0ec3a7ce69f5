use std::time::Duration;

use actix_multipart::MultipartError;
use actix_web::error::BlockingError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;
use tract_onnx::prelude::TractError;

use crate::models::ErrorResponse;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model not found at path: {0}")]
    ModelNotFound(String),

    #[error("failed to load model {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: TractError,
    },

    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("output shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("model execution failed: {0}")]
    Runtime(#[source] TractError),
}

/// Everything that can go wrong while serving `POST /analyze-image`.
#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("invalid multipart payload: {0}")]
    Upload(#[from] MultipartError),

    #[error("no file was uploaded")]
    MissingFile,

    #[error("upload exceeds the limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("could not stage upload: {0}")]
    Staging(#[from] std::io::Error),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("blocking task was canceled")]
    Canceled(#[from] BlockingError),

    #[error("too many inferences in flight ({limit}), try again later")]
    Busy { limit: usize },
}

impl AnalyzeError {
    /// Failures caused by what the client sent rather than by the service.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            AnalyzeError::Upload(_)
                | AnalyzeError::MissingFile
                | AnalyzeError::PayloadTooLarge { .. }
                | AnalyzeError::Classifier(ClassifierError::Decode(_))
        )
    }
}

impl ResponseError for AnalyzeError {
    fn status_code(&self) -> StatusCode {
        match self {
            AnalyzeError::Upload(_) | AnalyzeError::MissingFile => StatusCode::BAD_REQUEST,
            AnalyzeError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AnalyzeError::Busy { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AnalyzeError::Staging(_)
            | AnalyzeError::Classifier(_)
            | AnalyzeError::Timeout(_)
            | AnalyzeError::Canceled(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_mismatch_message() {
        let error = ClassifierError::ShapeMismatch {
            expected: vec![1, 2],
            got: vec![1, 1000],
        };
        assert_eq!(
            error.to_string(),
            "output shape mismatch: expected [1, 2], got [1, 1000]"
        );
    }

    #[test]
    fn classifier_errors_are_server_errors() {
        let decode = image::ImageError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "garbage",
        ));
        let error = AnalyzeError::from(ClassifierError::from(decode));
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(error.to_string().starts_with("failed to decode image"));
    }

    #[test]
    fn client_errors() {
        assert_eq!(AnalyzeError::MissingFile.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AnalyzeError::PayloadTooLarge { limit: 10 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn client_faults_exclude_service_failures() {
        let decode = image::ImageError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "garbage",
        ));
        assert!(AnalyzeError::from(ClassifierError::from(decode)).is_client_fault());
        assert!(AnalyzeError::MissingFile.is_client_fault());
        assert!(AnalyzeError::PayloadTooLarge { limit: 1 }.is_client_fault());

        let runtime = ClassifierError::Runtime(anyhow::anyhow!("accelerator fault"));
        assert!(!AnalyzeError::from(runtime).is_client_fault());
        assert!(!AnalyzeError::Timeout(Duration::from_secs(1)).is_client_fault());
        assert!(!AnalyzeError::Busy { limit: 4 }.is_client_fault());
    }

    #[test]
    fn busy_is_service_unavailable() {
        let error = AnalyzeError::Busy { limit: 4 };
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(error.to_string().contains("(4)"));
    }

    #[test]
    fn timeout_message_names_duration() {
        let error = AnalyzeError::Timeout(Duration::from_secs(3));
        assert_eq!(error.to_string(), "inference timed out after 3s");
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
