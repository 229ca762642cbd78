//! Error type shared by the driver, the launcher and the device.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Divisibility preconditions failed; raised before any launch.
    #[error("unsupported shape: {0}")]
    UnsupportedShape(String),
    #[error("invalid launch configuration for {kernel}: {reason}")]
    InvalidLaunch { kernel: &'static str, reason: String },
    #[error("workspace too small: required {required} f32 elements, got {got}")]
    WorkspaceTooSmall { required: usize, got: usize },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("device error: {0}")]
    Device(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

impl From<rayon::ThreadPoolBuildError> for BackendError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        BackendError::Device(format!("worker pool: {err}"))
    }
}

impl BackendError {
    pub(crate) fn launch(kernel: &'static str, reason: impl Into<String>) -> Self {
        BackendError::InvalidLaunch {
            kernel,
            reason: reason.into(),
        }
    }
}
