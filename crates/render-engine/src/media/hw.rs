//! Hardware decode device contexts.

use std::ptr;

use ffmpeg_next::{ffi, frame};

/// Owned `AVBufferRef` for a hardware device context.
pub(crate) struct HwDevice {
    ctx: *mut ffi::AVBufferRef,
    kind: ffi::AVHWDeviceType,
}

impl HwDevice {
    /// Open the platform's preferred decode device, or `None` when it is
    /// unavailable.
    pub fn open_preferred() -> Option<Self> {
        preferred_types().iter().find_map(|&kind| Self::open(kind))
    }

    fn open(kind: ffi::AVHWDeviceType) -> Option<Self> {
        let mut ctx: *mut ffi::AVBufferRef = ptr::null_mut();
        // SAFETY: `ctx` is a valid out-pointer; on success FFmpeg hands us
        // one reference which Drop releases.
        let ret = unsafe {
            ffi::av_hwdevice_ctx_create(&mut ctx, kind, ptr::null(), ptr::null_mut(), 0)
        };
        if ret < 0 || ctx.is_null() {
            tracing::debug!(device = ?kind, code = ret, "Hardware device unavailable");
            return None;
        }
        Some(Self { ctx, kind })
    }

    pub fn kind(&self) -> ffi::AVHWDeviceType {
        self.kind
    }

    /// A new reference for a codec context to own.
    pub fn new_ref(&self) -> *mut ffi::AVBufferRef {
        // SAFETY: `self.ctx` is a live buffer reference.
        unsafe { ffi::av_buffer_ref(self.ctx) }
    }
}

impl Drop for HwDevice {
    fn drop(&mut self) {
        if !self.ctx.is_null() {
            // SAFETY: we own exactly one reference.
            unsafe { ffi::av_buffer_unref(&mut self.ctx) };
        }
    }
}

#[cfg(target_os = "macos")]
fn preferred_types() -> &'static [ffi::AVHWDeviceType] {
    &[ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX]
}

#[cfg(not(target_os = "macos"))]
fn preferred_types() -> &'static [ffi::AVHWDeviceType] {
    &[ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA]
}

/// Whether `frame` lives in device memory.
pub(crate) fn is_hw_frame(frame: &frame::Video) -> bool {
    // SAFETY: reading a field of a frame we hold a reference to.
    unsafe { !(*frame.as_ptr()).hw_frames_ctx.is_null() }
}

/// Copy a device frame into system memory, keeping its timestamp.
pub(crate) fn transfer_hw_frame(hw_frame: &frame::Video) -> Result<frame::Video, ffmpeg_next::Error> {
    let mut sw_frame = frame::Video::empty();
    // SAFETY: both frames are valid; FFmpeg allocates the destination.
    unsafe {
        let ret = ffi::av_hwframe_transfer_data(sw_frame.as_mut_ptr(), hw_frame.as_ptr(), 0);
        if ret < 0 {
            return Err(ffmpeg_next::Error::from(ret));
        }
        (*sw_frame.as_mut_ptr()).pts = (*hw_frame.as_ptr()).pts;
        (*sw_frame.as_mut_ptr()).best_effort_timestamp = (*hw_frame.as_ptr()).best_effort_timestamp;
    }
    Ok(sw_frame)
}
