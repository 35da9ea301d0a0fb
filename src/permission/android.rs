use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::Result;
use log::{info, warn};
use slint::android::AndroidApp;

use super::{poll_decision, PermissionBackend, RequestHistory};
use crate::android::{
    check_self_permission, get_files_dir, request_permissions, sdk_version,
    should_show_request_permission_rationale,
};

const REQUEST_CODE: i32 = 100;

/// Runtime permissions of the hosting activity.
pub struct AndroidPermissions {
    app: AndroidApp,
    history: RequestHistory,
    poll_interval: Duration,
    wait_limit: Duration,
}

impl AndroidPermissions {
    pub fn new(app: AndroidApp, poll_interval: Duration, wait_limit: Duration) -> Result<Self> {
        let history = RequestHistory::new(PathBuf::from(get_files_dir(&app)?).join("permissions"));
        Ok(Self {
            app,
            history,
            poll_interval,
            wait_limit,
        })
    }

    /// Before Marshmallow permissions are granted at install time.
    fn has_runtime_permissions(&self) -> Result<bool> {
        let sdk_version = sdk_version(&self.app)?;
        info!("sdk version:{sdk_version}");
        Ok(sdk_version >= 23)
    }
}

impl PermissionBackend for AndroidPermissions {
    fn is_granted(&self, permission: &str) -> Result<bool> {
        if !self.has_runtime_permissions()? {
            return Ok(true);
        }
        check_self_permission(&self.app, permission)
    }

    fn should_show_rationale(&self, permission: &str) -> Result<bool> {
        should_show_request_permission_rationale(&self.app, permission)
    }

    fn requested_before(&self, permission: &str) -> Result<bool> {
        Ok(self.history.was_requested(permission))
    }

    fn request(&self, permission: &str) -> Result<()> {
        if let Err(err) = self.history.record(permission) {
            warn!("failed to record request of {permission}: {err:?}");
        }
        request_permissions(&self.app, &[permission], REQUEST_CODE)
    }

    /// The activity result never reaches native code, so the grant state is
    /// polled. Only a dialog dismissed without an answer runs to the limit.
    async fn wait_for_decision(&self, permission: &str) -> Result<bool> {
        let rationale_before = self.should_show_rationale(permission)?;
        let started = Instant::now();
        while started.elapsed() < self.wait_limit {
            crate::app::delay(self.poll_interval).await;
            let granted = check_self_permission(&self.app, permission)?;
            let rationale_now = self.should_show_rationale(permission)?;
            if let Some(decision) = poll_decision(granted, rationale_before, rationale_now) {
                return Ok(decision);
            }
        }
        warn!("no answer for {permission} after {:?}", self.wait_limit);
        Ok(false)
    }
}
