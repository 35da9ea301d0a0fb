use thiserror::Error;

/// Modal message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Ways a capture can end without a new photo.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("user cancelled the camera")]
    UserCancelled,
    #[error("camera launch failed: {0}")]
    LaunchError(String),
    #[error("unrecognized camera response")]
    UnknownResponse,
    #[error("a capture is already in progress")]
    Busy,
}

impl CaptureError {
    /// The notice for this failure; `None` for failures the user is not told about.
    pub fn notice(&self) -> Option<Notice> {
        let notice = match self {
            CaptureError::PermissionDenied => {
                Notice::new("Error", "Camera permission is required to take photos.")
            }
            CaptureError::UserCancelled => {
                Notice::new("Cancelled", "You cancelled the image picker.")
            }
            CaptureError::LaunchError(message) => {
                Notice::new("Error", format!("ImagePicker Error: {message}"))
            }
            CaptureError::UnknownResponse => Notice::new("Error", "An unknown error occurred."),
            CaptureError::Busy => return None,
        };
        Some(notice)
    }
}
