use std::time::Duration;

use crate::camera::MediaKind;
use crate::permission::PermissionRationale;

pub const CAMERA_PERMISSION: &str = "android.permission.CAMERA";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Android,
    Desktop,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Platform::Android
        } else {
            Platform::Desktop
        }
    }

    /// Whether camera access needs an explicit runtime grant from the user.
    pub fn requires_consent(&self) -> bool {
        matches!(self, Platform::Android)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rationale: PermissionRationale,
    pub media_kind: MediaKind,
    /// how often the permission state is re-read while the system dialog is up
    pub permission_poll_interval: Duration,
    pub permission_wait_limit: Duration,
    pub jpeg_quality: u8,
    pub image_size: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rationale: PermissionRationale {
                title: "Camera Permission".into(),
                message: "App needs camera access".into(),
                button_neutral: "Ask Me Later".into(),
                button_negative: "Cancel".into(),
                button_positive: "OK".into(),
            },
            media_kind: MediaKind::Photo,
            permission_poll_interval: Duration::from_millis(250),
            permission_wait_limit: Duration::from_secs(60),
            jpeg_quality: 90,
            image_size: 320,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rationale_buttons() {
        let config = AppConfig::default();
        assert_eq!(config.rationale.title, "Camera Permission");
        assert_eq!(config.rationale.button_neutral, "Ask Me Later");
        assert_eq!(config.rationale.button_negative, "Cancel");
        assert_eq!(config.rationale.button_positive, "OK");
    }

    #[test]
    fn test_consent_only_on_android() {
        assert!(Platform::Android.requires_consent());
        assert!(!Platform::Desktop.requires_consent());
    }
}
