use std::{
    cell::RefCell,
    path::Path,
    rc::Rc,
    sync::mpsc::{channel, Receiver},
    time::Duration,
};

use anyhow::{anyhow, Result};
use futures::channel::oneshot;
use image::RgbaImage;
use log::{error, info, warn};
use slint::{ComponentHandle, Image, Rgba8Pixel, SharedPixelBuffer, Timer, TimerMode, Weak};

use crate::camera::{
    Camera, CameraLauncher, ErrorCode, Facing, FrameResult, FrameSource, LaunchCallback,
    LaunchOptions, LaunchResponse, PhotoStore, Pump, Viewfinder,
};
use crate::capture::{CaptureController, CaptureState, CaptureView, Notice, ResourceLocator};
use crate::config::{AppConfig, Platform};
use crate::permission::{
    AlwaysGranted, PermissionRationale, PlatformGate, RationaleChoice, RationalePrompt,
};
#[cfg(target_os = "android")]
use crate::permission::{AndroidPermissions, ConsentGate};

slint::slint! {
    component PillButton inherits Rectangle {
        in property <string> text;
        in property <bool> dimmed;
        callback clicked;

        height: 48px;
        min-width: 220px;
        border-radius: 30px;
        background: touch.pressed ? #005b50 : (root.dimmed ? #4da197 : #00796B);
        drop-shadow-color: #0000004d;
        drop-shadow-offset-y: 2px;
        drop-shadow-blur: 5px;

        HorizontalLayout {
            padding-left: 24px;
            padding-right: 24px;
            Text {
                text: root.text;
                color: #ffffff;
                font-size: 16px;
                font-weight: 600;
                horizontal-alignment: center;
                vertical-alignment: center;
            }
        }
        touch := TouchArea {
            clicked => { root.clicked(); }
        }
    }

    component DialogButton inherits Rectangle {
        in property <string> text;
        callback clicked;

        height: 36px;
        border-radius: 4px;
        background: touch.pressed ? #e0f2f1 : transparent;

        HorizontalLayout {
            padding-left: 12px;
            padding-right: 12px;
            Text {
                text: root.text;
                color: #00796B;
                font-weight: 600;
                vertical-alignment: center;
            }
        }
        touch := TouchArea {
            clicked => { root.clicked(); }
        }
    }

    component ShutterButton inherits Rectangle {
        in property <bool> enabled;
        callback clicked;

        width: 72px;
        height: 72px;
        border-radius: 36px;
        border-width: 4px;
        border-color: #00796B;
        background: !root.enabled ? #ffffff55 : (touch.pressed ? #cfd8dc : #ffffff);

        touch := TouchArea {
            enabled: root.enabled;
            clicked => { root.clicked(); }
        }
    }

    component Modal inherits Rectangle {
        in property <string> title;
        in property <string> message;

        background: #00000066;
        TouchArea {}

        Rectangle {
            width: min(root.width - 48px, 320px);
            height: body.preferred-height;
            x: (root.width - self.width) / 2;
            y: (root.height - self.height) / 2;
            background: #ffffff;
            border-radius: 8px;

            body := VerticalLayout {
                padding: 20px;
                spacing: 12px;
                Text {
                    text: root.title;
                    font-size: 18px;
                    font-weight: 700;
                    color: #212121;
                }
                Text {
                    text: root.message;
                    font-size: 15px;
                    color: #424242;
                    wrap: word-wrap;
                }
                HorizontalLayout {
                    alignment: end;
                    spacing: 8px;
                    @children
                }
            }
        }
    }

    export component MainWindow inherits Window {
        in property <image> photo;
        in property <bool> has-photo;
        in property <length> photo-size: 320px;
        in property <bool> busy;

        in property <bool> alert-visible;
        in property <string> alert-title;
        in property <string> alert-message;

        in property <bool> viewfinder-visible;
        in property <bool> viewfinder-ready;
        in property <image> viewfinder-frame;

        in property <bool> rationale-visible;
        in property <string> rationale-title;
        in property <string> rationale-message;
        in property <string> rationale-neutral;
        in property <string> rationale-negative;
        in property <string> rationale-positive;

        // true: front camera
        callback open-camera(bool);
        callback alert-dismissed();
        callback shutter();
        callback dismiss-viewfinder();
        // 0 neutral, 1 negative, 2 positive
        callback rationale-answered(int);

        title: "Camera";
        background: #f0f4f8;

        VerticalLayout {
            alignment: center;
            padding: 16px;
            spacing: 10px;

            HorizontalLayout {
                alignment: center;
                PillButton {
                    text: "Open Front Camera";
                    dimmed: root.busy;
                    clicked => { root.open-camera(true); }
                }
            }
            HorizontalLayout {
                alignment: center;
                PillButton {
                    text: "Open Back Camera";
                    dimmed: root.busy;
                    clicked => { root.open-camera(false); }
                }
            }
            if root.has-photo: HorizontalLayout {
                alignment: center;
                padding-top: 10px;
                Rectangle {
                    width: root.photo-size;
                    height: root.photo-size;
                    border-radius: 16px;
                    drop-shadow-color: #00000066;
                    drop-shadow-offset-y: 2px;
                    drop-shadow-blur: 8px;
                    background: #ffffff;

                    Rectangle {
                        border-radius: 16px;
                        clip: true;
                        Image {
                            width: parent.width;
                            height: parent.height;
                            source: root.photo;
                            image-fit: cover;
                        }
                    }
                    Rectangle {
                        border-radius: 16px;
                        border-width: 2px;
                        border-color: #00796B;
                    }
                }
            }
        }

        if root.viewfinder-visible: Rectangle {
            background: #000000;
            TouchArea {}

            Image {
                width: parent.width;
                height: parent.height;
                source: root.viewfinder-frame;
                image-fit: contain;
            }
            if !root.viewfinder-ready: Text {
                text: "Starting camera...";
                color: #ffffff;
                font-size: 16px;
            }
            Rectangle {
                y: parent.height - self.height;
                height: 120px;
                background: #00000080;

                HorizontalLayout {
                    alignment: space-around;
                    padding: 24px;
                    Text {
                        text: "Cancel";
                        color: #ffffff;
                        font-size: 16px;
                        vertical-alignment: center;
                        TouchArea {
                            clicked => { root.dismiss-viewfinder(); }
                        }
                    }
                    ShutterButton {
                        enabled: root.viewfinder-ready;
                        clicked => { root.shutter(); }
                    }
                }
            }
        }

        if root.rationale-visible: Modal {
            title: root.rationale-title;
            message: root.rationale-message;
            DialogButton {
                text: root.rationale-neutral;
                clicked => { root.rationale-answered(0); }
            }
            DialogButton {
                text: root.rationale-negative;
                clicked => { root.rationale-answered(1); }
            }
            DialogButton {
                text: root.rationale-positive;
                clicked => { root.rationale-answered(2); }
            }
        }

        if root.alert-visible: Modal {
            title: root.alert-title;
            message: root.alert-message;
            DialogButton {
                text: "OK";
                clicked => { root.alert-dismissed(); }
            }
        }
    }
}

/// Resolves after `duration` on the UI event loop.
#[cfg_attr(not(target_os = "android"), allow(dead_code))]
pub async fn delay(duration: Duration) {
    let (sender, receiver) = oneshot::channel();
    slint::Timer::single_shot(duration, move || {
        let _ = sender.send(());
    });
    let _ = receiver.await;
}

fn to_slint_image(image: &RgbaImage) -> Image {
    let (width, height) = image.dimensions();
    let buffer = SharedPixelBuffer::<Rgba8Pixel>::clone_from_slice(image.as_raw(), width, height);
    Image::from_rgba8(buffer)
}

/// Decodes the captured file into a texture no bigger than twice the
/// presentation size.
fn load_photo(locator: &ResourceLocator, max_side: u32) -> Result<Image> {
    let path = locator
        .file_path()
        .ok_or_else(|| anyhow!("cannot display {locator}"))?;
    let photo = image::open(Path::new(path))?
        .thumbnail(max_side, max_side)
        .to_rgba8();
    Ok(to_slint_image(&photo))
}

/// What the photo area should show. A photo that cannot be decoded shows
/// nothing rather than the previous one.
fn displayed_photo(locator: Option<&ResourceLocator>, max_side: u32) -> Option<Image> {
    let locator = locator?;
    match load_photo(locator, max_side) {
        Ok(photo) => Some(photo),
        Err(err) => {
            error!("failed to load {locator}: {err:?}");
            None
        }
    }
}

/// Paints capture state into the main window.
pub struct SlintView {
    window: Weak<MainWindow>,
    image_size: u32,
}

impl SlintView {
    pub fn new(window: &MainWindow, image_size: u32) -> Self {
        Self {
            window: window.as_weak(),
            image_size,
        }
    }
}

impl CaptureView for SlintView {
    fn render(&self, state: &CaptureState) {
        let Some(window) = self.window.upgrade() else {
            return;
        };
        match displayed_photo(state.displayed(), self.image_size * 2) {
            Some(photo) => {
                window.set_photo(photo);
                window.set_has_photo(true);
            }
            None => window.set_has_photo(false),
        }
    }

    fn show_notice(&self, notice: &Notice) {
        if let Some(window) = self.window.upgrade() {
            window.set_alert_title(notice.title.as_str().into());
            window.set_alert_message(notice.message.as_str().into());
            window.set_alert_visible(true);
        }
    }
}

const FRAME_INTERVAL: Duration = Duration::from_millis(30);

struct Session {
    viewfinder: Viewfinder,
    frames: Receiver<FrameResult>,
}

struct LauncherInner {
    window: Weak<MainWindow>,
    camera: RefCell<Camera>,
    store: RefCell<PhotoStore>,
    session: RefCell<Option<Session>>,
    timer: Timer,
}

impl LauncherInner {
    fn pump(&self) {
        let pumped = {
            let mut session = self.session.borrow_mut();
            let Some(session) = session.as_mut() else {
                return;
            };
            let pumped = session.viewfinder.pump(&session.frames);
            if pumped == Pump::Frame {
                if let (Some(window), Some(frame)) =
                    (self.window.upgrade(), session.viewfinder.latest())
                {
                    window.set_viewfinder_frame(to_slint_image(frame));
                    window.set_viewfinder_ready(session.viewfinder.is_ready());
                }
            }
            pumped
        };
        if pumped == Pump::Closed {
            self.close();
        }
    }

    fn shutter(&self) {
        let taken = match self.session.borrow_mut().as_mut() {
            Some(session) => session.viewfinder.shutter(&mut self.store.borrow_mut()),
            None => false,
        };
        if taken {
            self.close();
        }
    }

    fn cancel(&self) {
        if let Some(session) = self.session.borrow_mut().as_mut() {
            session.viewfinder.cancel();
        }
        self.close();
    }

    /// Stops the camera and hides the viewfinder. A launch still open is
    /// answered as cancelled when its session drops.
    fn close(&self) {
        self.timer.stop();
        self.camera.borrow_mut().stop();
        let session = self.session.borrow_mut().take();
        drop(session);
        if let Some(window) = self.window.upgrade() {
            window.set_viewfinder_visible(false);
            window.set_viewfinder_ready(false);
        }
    }
}

/// Launcher that shows a live viewfinder inside the main window and answers
/// when the shutter or cancel is pressed.
#[derive(Clone)]
pub struct WindowLauncher {
    inner: Rc<LauncherInner>,
}

impl WindowLauncher {
    pub fn new(window: &MainWindow, camera: Camera, store: PhotoStore) -> Self {
        let inner = Rc::new(LauncherInner {
            window: window.as_weak(),
            camera: RefCell::new(camera),
            store: RefCell::new(store),
            session: RefCell::new(None),
            timer: Timer::default(),
        });

        let inner_weak = Rc::downgrade(&inner);
        window.on_shutter(move || {
            if let Some(inner) = inner_weak.upgrade() {
                inner.shutter();
            }
        });
        let inner_weak = Rc::downgrade(&inner);
        window.on_dismiss_viewfinder(move || {
            if let Some(inner) = inner_weak.upgrade() {
                info!("viewfinder dismissed");
                inner.cancel();
            }
        });
        Self { inner }
    }
}

impl CameraLauncher for WindowLauncher {
    fn launch(&self, options: &LaunchOptions, callback: LaunchCallback) {
        let inner = &self.inner;
        if inner.session.borrow().is_some() {
            callback(LaunchResponse::error(ErrorCode::Others, "camera is already open"));
            return;
        }

        let (sender, receiver) = channel();
        if let Err(err) = inner.camera.borrow_mut().start(options.facing, sender) {
            error!("failed to start {} camera: {err}", options.facing);
            callback(err.into_response());
            return;
        }
        *inner.session.borrow_mut() = Some(Session {
            viewfinder: Viewfinder::new(callback, options.quality),
            frames: receiver,
        });
        if let Some(window) = inner.window.upgrade() {
            window.set_viewfinder_ready(false);
            window.set_viewfinder_visible(true);
        }

        let inner_weak = Rc::downgrade(inner);
        inner.timer.start(TimerMode::Repeated, FRAME_INTERVAL, move || {
            if let Some(inner) = inner_weak.upgrade() {
                inner.pump();
            }
        });
    }
}

/// Rationale dialog inside the main window.
#[cfg_attr(not(target_os = "android"), allow(dead_code))]
pub struct SlintPrompt {
    window: Weak<MainWindow>,
    answer: Rc<RefCell<Option<oneshot::Sender<RationaleChoice>>>>,
}

#[cfg_attr(not(target_os = "android"), allow(dead_code))]
impl SlintPrompt {
    pub fn new(window: &MainWindow) -> Self {
        let answer: Rc<RefCell<Option<oneshot::Sender<RationaleChoice>>>> = Rc::default();
        let answer_clone = answer.clone();
        let window_weak = window.as_weak();
        window.on_rationale_answered(move |button| {
            if let Some(window) = window_weak.upgrade() {
                window.set_rationale_visible(false);
            }
            let choice = match button {
                0 => RationaleChoice::Neutral,
                2 => RationaleChoice::Positive,
                _ => RationaleChoice::Negative,
            };
            if let Some(sender) = answer_clone.borrow_mut().take() {
                let _ = sender.send(choice);
            }
        });
        Self {
            window: window.as_weak(),
            answer,
        }
    }
}

impl RationalePrompt for SlintPrompt {
    async fn ask(&self, rationale: &PermissionRationale) -> RationaleChoice {
        let Some(window) = self.window.upgrade() else {
            return RationaleChoice::Negative;
        };
        let (sender, receiver) = oneshot::channel();
        *self.answer.borrow_mut() = Some(sender);

        window.set_rationale_title(rationale.title.as_str().into());
        window.set_rationale_message(rationale.message.as_str().into());
        window.set_rationale_neutral(rationale.button_neutral.as_str().into());
        window.set_rationale_negative(rationale.button_negative.as_str().into());
        window.set_rationale_positive(rationale.button_positive.as_str().into());
        window.set_rationale_visible(true);
        drop(window);

        receiver.await.unwrap_or(RationaleChoice::Negative)
    }
}

#[cfg(target_os = "android")]
type ConsentImpl = ConsentGate<AndroidPermissions, SlintPrompt>;
#[cfg(not(target_os = "android"))]
type ConsentImpl = AlwaysGranted;

fn platform_gate(
    platform: Platform,
    consent: impl FnOnce() -> ConsentImpl,
) -> PlatformGate<ConsentImpl> {
    info!("running on {platform:?}");
    if platform.requires_consent() {
        PlatformGate::Consent(consent())
    } else {
        PlatformGate::Always(AlwaysGranted)
    }
}

pub fn run(#[cfg(target_os = "android")] android_app: slint::android::AndroidApp) -> Result<()> {
    let config = AppConfig::default();
    let app = MainWindow::new()?;
    app.set_photo_size(config.image_size as f32);

    let camera = Camera::new(
        #[cfg(target_os = "android")]
        android_app.clone(),
    );
    let mut store = PhotoStore::new(camera.photo_dir()?);
    if let Err(err) = store.clear() {
        warn!("failed to clear old photos: {err:?}");
    }
    let launcher = WindowLauncher::new(&app, camera, store);

    #[cfg(target_os = "android")]
    let permissions = AndroidPermissions::new(
        android_app,
        config.permission_poll_interval,
        config.permission_wait_limit,
    )?;
    #[cfg(target_os = "android")]
    let gate = platform_gate(Platform::current(), || {
        ConsentGate::new(permissions, SlintPrompt::new(&app))
    });
    #[cfg(not(target_os = "android"))]
    let gate = platform_gate(Platform::current(), || AlwaysGranted);

    let view = SlintView::new(&app, config.image_size);
    let controller = Rc::new(CaptureController::new(gate, launcher, view, config));

    let app_weak = app.as_weak();
    app.on_alert_dismissed(move || {
        if let Some(app) = app_weak.upgrade() {
            app.set_alert_visible(false);
        }
    });

    let app_weak = app.as_weak();
    app.on_open_camera(move |front| {
        let facing = if front { Facing::Front } else { Facing::Back };
        let controller = controller.clone();
        let app_weak = app_weak.clone();
        let task = slint::spawn_local(async move {
            let set_busy = |busy: bool| {
                if let Some(app) = app_weak.upgrade() {
                    app.set_busy(busy);
                }
            };
            if !controller.is_pending() {
                set_busy(true);
            }
            let result = controller.capture(facing).await;
            if !controller.is_pending() {
                set_busy(false);
            }
            info!("{facing} capture finished: {result:?}");
        });
        if let Err(err) = task {
            error!("failed to schedule capture: {err}");
        }
    });

    app.run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_displayed_photo() {
        assert!(displayed_photo(None, 640).is_none());

        let missing = ResourceLocator::new("file:///no/such/photo_0.jpg");
        assert!(displayed_photo(Some(&missing), 640).is_none());

        let dir = std::env::temp_dir().join(format!("displayed_photo_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("photo_1.jpg");
        image::RgbImage::from_pixel(1280, 960, image::Rgb([0, 121, 107]))
            .save(&path)
            .unwrap();
        let locator = ResourceLocator::new(format!("file://{}", path.display()));

        let photo = displayed_photo(Some(&locator), 640).unwrap();
        let size = photo.size();
        assert_eq!((size.width, size.height), (640, 480));

        std::fs::write(&path, b"not a jpeg").unwrap();
        assert!(displayed_photo(Some(&locator), 640).is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(not(target_os = "android"))]
    #[test]
    fn test_platform_gate_selection() {
        use std::cell::Cell;

        let built = Cell::new(0);
        let gate = platform_gate(Platform::Desktop, || {
            built.set(built.get() + 1);
            AlwaysGranted
        });
        assert!(matches!(gate, PlatformGate::Always(_)));
        assert_eq!(built.get(), 0);

        let gate = platform_gate(Platform::Android, || {
            built.set(built.get() + 1);
            AlwaysGranted
        });
        assert!(matches!(gate, PlatformGate::Consent(_)));
        assert_eq!(built.get(), 1);
    }
}
