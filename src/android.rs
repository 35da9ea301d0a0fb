//! Activity calls over JNI.

use anyhow::{anyhow, Result};
use jni::{
    objects::{JObject, JString, JValueGen},
    sys::{JNIInvokeInterface_, _jobject, jint},
    JNIEnv, JavaVM,
};
use slint::android::AndroidApp;

fn with_activity<T>(
    app: &AndroidApp,
    f: impl FnOnce(&mut JNIEnv, &JObject) -> Result<T>,
) -> Result<T> {
    unsafe {
        let vm = JavaVM::from_raw(app.vm_as_ptr() as *mut *const JNIInvokeInterface_)?;
        let mut env = vm.attach_current_thread()?;
        let activity: JObject<'_> = JObject::from_raw(app.activity_as_ptr() as *mut _jobject);
        f(&mut *env, &activity)
    }
}

pub fn sdk_version(app: &AndroidApp) -> Result<i32> {
    with_activity(app, |env, _| {
        Ok(env
            .get_static_field("android/os/Build$VERSION", "SDK_INT", "I")?
            .i()?)
    })
}

pub fn check_self_permission(app: &AndroidApp, permission: &str) -> Result<bool> {
    with_activity(app, |env, activity| {
        let granted_int = env
            .get_static_field(
                "android/content/pm/PackageManager",
                "PERMISSION_GRANTED",
                "I",
            )?
            .i()?;
        let permission_str = env.new_string(permission)?;
        let result = env
            .call_method(
                activity,
                "checkSelfPermission",
                "(Ljava/lang/String;)I",
                &[JValueGen::Object(&JObject::from(permission_str))],
            )?
            .i()?;
        Ok(result == granted_int)
    })
}

/// True when the user denied the permission once and the platform wants the
/// app to explain itself before asking again.
pub fn should_show_request_permission_rationale(app: &AndroidApp, permission: &str) -> Result<bool> {
    with_activity(app, |env, activity| {
        let permission_str = env.new_string(permission)?;
        Ok(env
            .call_method(
                activity,
                "shouldShowRequestPermissionRationale",
                "(Ljava/lang/String;)Z",
                &[JValueGen::Object(&JObject::from(permission_str))],
            )?
            .z()?)
    })
}

pub fn request_permissions(app: &AndroidApp, permissions: &[&str], request_code: i32) -> Result<()> {
    with_activity(app, |env, activity| {
        let permission_count = permissions.len() as jint;
        let java_permission_array =
            env.new_object_array(permission_count, "java/lang/String", JObject::null())?;
        for (index, permission) in permissions.iter().enumerate() {
            let permission_str = env.new_string(*permission)?;
            env.set_object_array_element(&java_permission_array, index as jint, permission_str)?;
        }
        env.call_method(
            activity,
            "requestPermissions",
            "([Ljava/lang/String;I)V",
            &[
                JValueGen::Object(&JObject::from(java_permission_array)),
                request_code.into(),
            ],
        )?;
        Ok(())
    })
}

fn activity_dir(app: &AndroidApp, getter: &str) -> Result<String> {
    with_activity(app, |env, activity| {
        let file = env
            .call_method(activity, getter, "()Ljava/io/File;", &[])?
            .l()?;
        if file.is_null() {
            return Err(anyhow!("activity returned no directory from {getter}"));
        }
        let path = env
            .call_method(&file, "getAbsolutePath", "()Ljava/lang/String;", &[])?
            .l()?;
        let path: JString = path.into();
        let path: String = env.get_string(&path)?.into();
        Ok(path)
    })
}

pub fn get_cache_dir(app: &AndroidApp) -> Result<String> {
    activity_dir(app, "getCacheDir")
}

/// Survives cache clearing, unlike [`get_cache_dir`].
pub fn get_files_dir(app: &AndroidApp) -> Result<String> {
    activity_dir(app, "getFilesDir")
}
