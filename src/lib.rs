#[cfg(target_os = "android")]
mod android;

mod app;
pub mod camera;
pub mod capture;
pub mod config;
pub mod permission;

pub use app::run;

#[cfg(target_os = "android")]
#[no_mangle]
fn android_main(app: slint::android::AndroidApp) {
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Info)
            .with_tag("slint_camera_capture"),
    );
    if let Err(err) = slint::android::init(app.clone()) {
        log::error!("slint init failed: {err}");
        return;
    }
    if let Err(err) = app::run(app) {
        log::error!("{err:?}");
    }
}
