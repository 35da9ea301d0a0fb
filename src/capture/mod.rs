//! Permission-then-launch sequence behind the two camera buttons.

use std::cell::{Cell, Ref, RefCell};

use futures::channel::oneshot;
use log::{debug, info, warn};

use crate::camera::{CameraLauncher, Facing, LaunchOptions, LaunchResponse};
use crate::config::{AppConfig, CAMERA_PERMISSION};
use crate::permission::PermissionGate;

mod error;
mod state;

pub use self::error::{CaptureError, Notice};
pub use self::state::{CaptureState, ResourceLocator};

/// Surface that paints `CaptureState` and pops up notices.
pub trait CaptureView {
    fn render(&self, state: &CaptureState);
    fn show_notice(&self, notice: &Notice);
}

pub struct CaptureController<G, L, V> {
    gate: G,
    launcher: L,
    view: V,
    config: AppConfig,
    state: RefCell<CaptureState>,
    pending: Cell<bool>,
}

/// Clears the pending flag however the capture ends.
struct PendingGuard<'a>(&'a Cell<bool>);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<G, L, V> CaptureController<G, L, V>
where
    G: PermissionGate,
    L: CameraLauncher,
    V: CaptureView,
{
    pub fn new(gate: G, launcher: L, view: V, config: AppConfig) -> Self {
        Self {
            gate,
            launcher,
            view,
            config,
            state: RefCell::new(CaptureState::default()),
            pending: Cell::new(false),
        }
    }

    pub fn state(&self) -> Ref<'_, CaptureState> {
        self.state.borrow()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }

    /// Asks for camera permission, opens the `facing` camera and shows the
    /// photo. Failures are reported to the view as a notice and returned.
    /// A call made while another one is still running is ignored with
    /// [`CaptureError::Busy`].
    pub async fn capture(&self, facing: Facing) -> Result<ResourceLocator, CaptureError> {
        if self.pending.replace(true) {
            debug!("ignoring {facing} capture, another one is pending");
            return Err(CaptureError::Busy);
        }
        let _guard = PendingGuard(&self.pending);

        let result = self.run(facing).await;
        match &result {
            Ok(locator) => info!("displaying {locator}"),
            Err(err) => {
                if let Some(notice) = err.notice() {
                    self.view.show_notice(&notice);
                }
            }
        }
        result
    }

    async fn run(&self, facing: Facing) -> Result<ResourceLocator, CaptureError> {
        let granted = match self
            .gate
            .request(CAMERA_PERMISSION, &self.config.rationale)
            .await
        {
            Ok(granted) => granted,
            Err(err) => {
                warn!("permission request failed: {err:?}");
                false
            }
        };
        if !granted {
            info!("camera permission not granted");
            return Err(CaptureError::PermissionDenied);
        }

        info!("Opening {facing} camera");
        let options = LaunchOptions {
            media_kind: self.config.media_kind,
            ..LaunchOptions::photo(facing, self.config.jpeg_quality)
        };
        let response = launch_once(&self.launcher, &options).await;
        let locator = interpret(response)?;
        self.set_displayed(locator.clone());
        Ok(locator)
    }

    fn set_displayed(&self, locator: ResourceLocator) {
        self.state.borrow_mut().set_displayed(locator);
        self.view.render(&self.state.borrow());
    }
}

/// Runs a callback based launcher as a future. `None` when the launcher
/// dropped the callback without answering.
pub async fn launch_once<L: CameraLauncher>(
    launcher: &L,
    options: &LaunchOptions,
) -> Option<LaunchResponse> {
    let (sender, receiver) = oneshot::channel();
    launcher.launch(
        options,
        Box::new(move |response| {
            let _ = sender.send(response);
        }),
    );
    receiver.await.ok()
}

/// Cancel wins over an error code, which wins over assets.
fn interpret(response: Option<LaunchResponse>) -> Result<ResourceLocator, CaptureError> {
    let Some(response) = response else {
        warn!("Unknown response from image picker: launcher went away");
        return Err(CaptureError::UnknownResponse);
    };

    if response.did_cancel {
        info!("User cancelled image picker");
        return Err(CaptureError::UserCancelled);
    }
    if let Some(code) = response.error_code {
        let message = response
            .error_message
            .unwrap_or_else(|| code.as_str().to_string());
        warn!("ImagePicker Error: {message}");
        return Err(CaptureError::LaunchError(message));
    }
    match response.assets.as_deref() {
        Some([first, ..]) => Ok(ResourceLocator::new(first.uri.clone())),
        _ => {
            warn!("Unknown response from image picker: {response:?}");
            Err(CaptureError::UnknownResponse)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Asset, ErrorCode, LaunchCallback, MediaKind};
    use crate::permission::PermissionRationale;
    use anyhow::{anyhow, Result};
    use std::collections::VecDeque;

    enum Grant {
        Yes,
        No,
        Fails,
    }

    struct FakeGate {
        grant: Grant,
        asked: Cell<usize>,
    }

    impl FakeGate {
        fn new(grant: Grant) -> Self {
            Self {
                grant,
                asked: Cell::new(0),
            }
        }
    }

    impl PermissionGate for &FakeGate {
        async fn request(&self, permission: &str, rationale: &PermissionRationale) -> Result<bool> {
            assert_eq!(permission, "android.permission.CAMERA");
            assert_eq!(rationale.message, "App needs camera access");
            self.asked.set(self.asked.get() + 1);
            match self.grant {
                Grant::Yes => Ok(true),
                Grant::No => Ok(false),
                Grant::Fails => Err(anyhow!("activity is gone")),
            }
        }
    }

    enum Reply {
        Now(LaunchResponse),
        Drop,
        Later,
    }

    #[derive(Default)]
    struct FakeLauncher {
        replies: RefCell<VecDeque<Reply>>,
        launched: RefCell<Vec<LaunchOptions>>,
        parked: RefCell<Option<LaunchCallback>>,
    }

    impl FakeLauncher {
        fn replying(replies: impl IntoIterator<Item = Reply>) -> Self {
            Self {
                replies: RefCell::new(replies.into_iter().collect()),
                ..Default::default()
            }
        }

        fn answer_parked(&self, response: LaunchResponse) {
            let callback = self.parked.borrow_mut().take().expect("no parked launch");
            callback(response);
        }
    }

    impl CameraLauncher for &FakeLauncher {
        fn launch(&self, options: &LaunchOptions, callback: LaunchCallback) {
            self.launched.borrow_mut().push(options.clone());
            match self.replies.borrow_mut().pop_front() {
                Some(Reply::Now(response)) => callback(response),
                Some(Reply::Later) => *self.parked.borrow_mut() = Some(callback),
                Some(Reply::Drop) | None => drop(callback),
            }
        }
    }

    #[derive(Default)]
    struct RecordingView {
        notices: RefCell<Vec<Notice>>,
        renders: RefCell<Vec<Option<ResourceLocator>>>,
    }

    impl CaptureView for &RecordingView {
        fn render(&self, state: &CaptureState) {
            self.renders.borrow_mut().push(state.displayed().cloned());
        }

        fn show_notice(&self, notice: &Notice) {
            self.notices.borrow_mut().push(notice.clone());
        }
    }

    fn photo(uri: &str) -> Reply {
        Reply::Now(LaunchResponse::assets(vec![Asset::from_uri(uri)]))
    }

    fn controller<'a>(
        gate: &'a FakeGate,
        launcher: &'a FakeLauncher,
        view: &'a RecordingView,
    ) -> CaptureController<&'a FakeGate, &'a FakeLauncher, &'a RecordingView> {
        CaptureController::new(gate, launcher, view, AppConfig::default())
    }

    #[test]
    fn test_granted_back_camera_displays_photo() {
        let gate = FakeGate::new(Grant::Yes);
        let launcher = FakeLauncher::replying([photo("file:///a.jpg")]);
        let view = RecordingView::default();
        let controller = controller(&gate, &launcher, &view);

        let result = pollster::block_on(controller.capture(Facing::Back));

        assert_eq!(result, Ok(ResourceLocator::new("file:///a.jpg")));
        assert_eq!(
            controller.state().displayed(),
            Some(&ResourceLocator::new("file:///a.jpg"))
        );
        assert_eq!(
            view.renders.borrow().as_slice(),
            [Some(ResourceLocator::new("file:///a.jpg"))]
        );
        assert!(view.notices.borrow().is_empty());

        let launched = launcher.launched.borrow();
        assert_eq!(launched.len(), 1);
        assert_eq!(launched[0].facing, Facing::Back);
        assert_eq!(launched[0].media_kind, MediaKind::Photo);
        assert!(!controller.is_pending());
    }

    #[test]
    fn test_denied_permission_shows_notice_once() {
        for facing in [Facing::Front, Facing::Back] {
            let gate = FakeGate::new(Grant::No);
            let launcher = FakeLauncher::replying([photo("file:///never.jpg")]);
            let view = RecordingView::default();
            let controller = controller(&gate, &launcher, &view);

            let result = pollster::block_on(controller.capture(facing));

            assert_eq!(result, Err(CaptureError::PermissionDenied));
            assert_eq!(controller.state().displayed(), None);
            assert_eq!(
                view.notices.borrow().as_slice(),
                [Notice::new("Error", "Camera permission is required to take photos.")]
            );
            assert!(launcher.launched.borrow().is_empty());
            assert!(view.renders.borrow().is_empty());
        }
    }

    #[test]
    fn test_failing_permission_request_counts_as_denial() {
        let gate = FakeGate::new(Grant::Fails);
        let launcher = FakeLauncher::default();
        let view = RecordingView::default();
        let controller = controller(&gate, &launcher, &view);

        let result = pollster::block_on(controller.capture(Facing::Front));

        assert_eq!(result, Err(CaptureError::PermissionDenied));
        assert_eq!(view.notices.borrow().len(), 1);
        assert!(launcher.launched.borrow().is_empty());
    }

    #[test]
    fn test_cancel_keeps_state() {
        let gate = FakeGate::new(Grant::Yes);
        let launcher = FakeLauncher::replying([
            photo("file:///first.jpg"),
            Reply::Now(LaunchResponse::cancelled()),
        ]);
        let view = RecordingView::default();
        let controller = controller(&gate, &launcher, &view);

        pollster::block_on(controller.capture(Facing::Back)).unwrap();
        let result = pollster::block_on(controller.capture(Facing::Back));

        assert_eq!(result, Err(CaptureError::UserCancelled));
        assert_eq!(
            controller.state().displayed(),
            Some(&ResourceLocator::new("file:///first.jpg"))
        );
        assert_eq!(
            view.notices.borrow().as_slice(),
            [Notice::new("Cancelled", "You cancelled the image picker.")]
        );
        assert_eq!(view.renders.borrow().len(), 1);
    }

    #[test]
    fn test_launch_error_message_verbatim() {
        let gate = FakeGate::new(Grant::Yes);
        let launcher = FakeLauncher::replying([Reply::Now(LaunchResponse::error(
            ErrorCode::CameraUnavailable,
            "Device busy",
        ))]);
        let view = RecordingView::default();
        let controller = controller(&gate, &launcher, &view);

        let result = pollster::block_on(controller.capture(Facing::Back));

        assert_eq!(result, Err(CaptureError::LaunchError("Device busy".into())));
        assert_eq!(controller.state().displayed(), None);
        assert_eq!(
            view.notices.borrow().as_slice(),
            [Notice::new("Error", "ImagePicker Error: Device busy")]
        );
    }

    #[test]
    fn test_launch_error_without_message_uses_code() {
        let response = LaunchResponse {
            error_code: Some(ErrorCode::Others),
            ..Default::default()
        };
        assert_eq!(
            interpret(Some(response)),
            Err(CaptureError::LaunchError("others".into()))
        );
    }

    #[test]
    fn test_empty_assets_is_unknown() {
        let gate = FakeGate::new(Grant::Yes);
        let launcher = FakeLauncher::replying([Reply::Now(LaunchResponse::assets(vec![]))]);
        let view = RecordingView::default();
        let controller = controller(&gate, &launcher, &view);

        let result = pollster::block_on(controller.capture(Facing::Front));

        assert_eq!(result, Err(CaptureError::UnknownResponse));
        assert_eq!(controller.state().displayed(), None);
        assert_eq!(
            view.notices.borrow().as_slice(),
            [Notice::new("Error", "An unknown error occurred.")]
        );
    }

    #[test]
    fn test_dropped_callback_is_unknown() {
        let gate = FakeGate::new(Grant::Yes);
        let launcher = FakeLauncher::replying([Reply::Drop]);
        let view = RecordingView::default();
        let controller = controller(&gate, &launcher, &view);

        let result = pollster::block_on(controller.capture(Facing::Back));

        assert_eq!(result, Err(CaptureError::UnknownResponse));
        assert!(!controller.is_pending());
    }

    #[test]
    fn test_first_asset_wins() {
        let gate = FakeGate::new(Grant::Yes);
        let launcher = FakeLauncher::replying([Reply::Now(LaunchResponse::assets(vec![
            Asset::from_uri("file:///one.jpg"),
            Asset::from_uri("file:///two.jpg"),
            Asset::from_uri("file:///three.jpg"),
        ]))]);
        let view = RecordingView::default();
        let controller = controller(&gate, &launcher, &view);

        pollster::block_on(controller.capture(Facing::Back)).unwrap();

        assert_eq!(
            controller.state().displayed(),
            Some(&ResourceLocator::new("file:///one.jpg"))
        );
    }

    #[test]
    fn test_last_capture_wins() {
        let gate = FakeGate::new(Grant::Yes);
        let launcher =
            FakeLauncher::replying([photo("file:///first.jpg"), photo("file:///second.jpg")]);
        let view = RecordingView::default();
        let controller = controller(&gate, &launcher, &view);

        pollster::block_on(controller.capture(Facing::Front)).unwrap();
        pollster::block_on(controller.capture(Facing::Back)).unwrap();

        assert_eq!(
            controller.state().displayed(),
            Some(&ResourceLocator::new("file:///second.jpg"))
        );
        assert_eq!(gate.asked.get(), 2);
    }

    #[test]
    fn test_outcome_precedence() {
        let everything = LaunchResponse {
            did_cancel: true,
            error_code: Some(ErrorCode::Others),
            error_message: Some("boom".into()),
            assets: Some(vec![Asset::from_uri("file:///x.jpg")]),
        };
        assert_eq!(interpret(Some(everything.clone())), Err(CaptureError::UserCancelled));

        let no_cancel = LaunchResponse {
            did_cancel: false,
            ..everything
        };
        assert_eq!(
            interpret(Some(no_cancel.clone())),
            Err(CaptureError::LaunchError("boom".into()))
        );

        let assets_only = LaunchResponse {
            error_code: None,
            ..no_cancel
        };
        assert_eq!(
            interpret(Some(assets_only)),
            Ok(ResourceLocator::new("file:///x.jpg"))
        );
        assert_eq!(
            interpret(Some(LaunchResponse::default())),
            Err(CaptureError::UnknownResponse)
        );
    }

    #[test]
    fn test_overlapping_capture_is_ignored() {
        let gate = FakeGate::new(Grant::Yes);
        let launcher = FakeLauncher::replying([Reply::Later]);
        let view = RecordingView::default();
        let controller = controller(&gate, &launcher, &view);

        let (first, second) = pollster::block_on(async {
            futures::join!(controller.capture(Facing::Back), async {
                let second = controller.capture(Facing::Front).await;
                launcher.answer_parked(LaunchResponse::assets(vec![Asset::from_uri(
                    "file:///slow.jpg",
                )]));
                second
            })
        });

        assert_eq!(first, Ok(ResourceLocator::new("file:///slow.jpg")));
        assert_eq!(second, Err(CaptureError::Busy));
        assert_eq!(launcher.launched.borrow().len(), 1);
        assert!(view.notices.borrow().is_empty());
        assert!(!controller.is_pending());

        // free again once the first one finished
        *launcher.replies.borrow_mut() = VecDeque::from([photo("file:///next.jpg")]);
        let third = pollster::block_on(controller.capture(Facing::Front));
        assert_eq!(third, Ok(ResourceLocator::new("file:///next.jpg")));
    }
}
