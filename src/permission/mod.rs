use std::path::PathBuf;

use anyhow::Result;
use log::{debug, info};

#[cfg(target_os = "android")]
mod android;

#[cfg(target_os = "android")]
pub use self::android::AndroidPermissions;

/// Text shown when the user has to be told why the app wants a permission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRationale {
    pub title: String,
    pub message: String,
    pub button_neutral: String,
    pub button_negative: String,
    pub button_positive: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RationaleChoice {
    /// "Ask Me Later"
    Neutral,
    /// "Cancel"
    Negative,
    /// "OK"
    Positive,
}

/// Decides whether the app may use a capability.
#[allow(async_fn_in_trait)]
pub trait PermissionGate {
    async fn request(&self, permission: &str, rationale: &PermissionRationale) -> Result<bool>;
}

/// Gate for platforms without a runtime consent model.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysGranted;

impl PermissionGate for AlwaysGranted {
    async fn request(&self, permission: &str, _rationale: &PermissionRationale) -> Result<bool> {
        debug!("{permission} needs no runtime grant here");
        Ok(true)
    }
}

/// Platform side of a runtime permission system.
#[allow(async_fn_in_trait)]
pub trait PermissionBackend {
    fn is_granted(&self, permission: &str) -> Result<bool>;
    fn should_show_rationale(&self, permission: &str) -> Result<bool>;
    /// True once the system dialog has been shown for `permission` on this
    /// install.
    fn requested_before(&self, permission: &str) -> Result<bool>;
    /// Opens the system permission dialog.
    fn request(&self, permission: &str) -> Result<()>;
    /// Resolves once the user answered the system dialog.
    async fn wait_for_decision(&self, permission: &str) -> Result<bool>;
}

/// Outcome of one poll while the system dialog is up. The rationale flag
/// flips on every denial: false to true on the first, true to false once the
/// user picks "don't ask again".
#[cfg_attr(not(target_os = "android"), allow(dead_code))]
pub(crate) fn poll_decision(granted: bool, rationale_before: bool, rationale_now: bool) -> Option<bool> {
    if granted {
        Some(true)
    } else if rationale_now != rationale_before {
        Some(false)
    } else {
        None
    }
}

/// Marker files recording which permissions were already requested. The
/// platform cannot tell "never asked" from "denied for good" on its own.
#[cfg_attr(not(target_os = "android"), allow(dead_code))]
pub(crate) struct RequestHistory {
    dir: PathBuf,
}

#[cfg_attr(not(target_os = "android"), allow(dead_code))]
impl RequestHistory {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn marker(&self, permission: &str) -> PathBuf {
        let name: String = permission
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("requested_{name}"))
    }

    pub fn was_requested(&self, permission: &str) -> bool {
        self.marker(permission).exists()
    }

    pub fn record(&self, permission: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.marker(permission), b"")?;
        Ok(())
    }
}

/// Shows a rationale with three buttons and reports which one was pressed.
#[allow(async_fn_in_trait)]
pub trait RationalePrompt {
    async fn ask(&self, rationale: &PermissionRationale) -> RationaleChoice;
}

/// Gate for platforms where the user grants permissions at runtime.
pub struct ConsentGate<B, P> {
    backend: B,
    prompt: P,
}

impl<B: PermissionBackend, P: RationalePrompt> ConsentGate<B, P> {
    pub fn new(backend: B, prompt: P) -> Self {
        Self { backend, prompt }
    }
}

impl<B: PermissionBackend, P: RationalePrompt> PermissionGate for ConsentGate<B, P> {
    async fn request(&self, permission: &str, rationale: &PermissionRationale) -> Result<bool> {
        if self.backend.is_granted(permission)? {
            return Ok(true);
        }

        // the rationale only explains; whatever button is pressed the
        // system dialog follows
        if self.backend.should_show_rationale(permission)? {
            let choice = self.prompt.ask(rationale).await;
            info!("rationale for {permission} answered with {choice:?}");
        } else if self.backend.requested_before(permission)? {
            info!("{permission} was denied for good, not asking again");
            return Ok(false);
        }

        self.backend.request(permission)?;
        self.backend.wait_for_decision(permission).await
    }
}

/// Gate picked for the running platform.
pub enum PlatformGate<G> {
    Consent(G),
    Always(AlwaysGranted),
}

impl<G: PermissionGate> PermissionGate for PlatformGate<G> {
    async fn request(&self, permission: &str, rationale: &PermissionRationale) -> Result<bool> {
        match self {
            PlatformGate::Consent(gate) => gate.request(permission, rationale).await,
            PlatformGate::Always(gate) => gate.request(permission, rationale).await,
        }
    }
}
