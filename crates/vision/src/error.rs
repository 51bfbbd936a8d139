use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("contour detection failed: {0}")]
    Detection(String),
    #[error("invalid vision settings: {0}")]
    InvalidSettings(String),
}
