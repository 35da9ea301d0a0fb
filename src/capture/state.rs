use std::fmt;

/// Opaque reference to a captured image (file path or content uri).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceLocator(String);

impl ResourceLocator {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem path for `file://` locators.
    pub fn file_path(&self) -> Option<&str> {
        self.0.strip_prefix("file://")
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the screen shows. Only the capture success path writes to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureState {
    displayed: Option<ResourceLocator>,
}

impl CaptureState {
    pub fn displayed(&self) -> Option<&ResourceLocator> {
        self.displayed.as_ref()
    }

    pub(super) fn set_displayed(&mut self, locator: ResourceLocator) {
        self.displayed = Some(locator);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_empty() {
        assert_eq!(CaptureState::default().displayed(), None);
    }

    #[test]
    fn test_file_path() {
        let locator = ResourceLocator::new("file:///data/cache/photo_1.jpg");
        assert_eq!(locator.file_path(), Some("/data/cache/photo_1.jpg"));
        assert_eq!(ResourceLocator::new("content://media/1").file_path(), None);
    }
}
