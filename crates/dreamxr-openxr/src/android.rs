//! Android glue: the OpenXR loader reads the JavaVM and activity from the
//! process-wide `ndk-context`.

use std::sync::atomic::{AtomicBool, Ordering};

use dreamxr_vr::{VrError, VrResult};
use tracing::debug;

use crate::runtime::HostContext;

static CONTEXT_SET: AtomicBool = AtomicBool::new(false);

pub(crate) fn install_context(host: &HostContext) -> VrResult<()> {
    if host.java_vm.is_null() || host.activity.is_null() {
        return Err(VrError::Init(
            "JavaVM and activity are required on Android".to_string(),
        ));
    }
    if CONTEXT_SET.swap(true, Ordering::AcqRel) {
        return Ok(());
    }
    unsafe { ndk_context::initialize_android_context(host.java_vm, host.activity) };
    debug!("android context installed");
    Ok(())
}

pub(crate) fn release_context() {
    if CONTEXT_SET.swap(false, Ordering::AcqRel) {
        unsafe { ndk_context::release_android_context() };
        debug!("android context released");
    }
}
