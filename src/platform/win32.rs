use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::debug;
use windows::Win32::Foundation::{HWND, LPARAM};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GWL_EXSTYLE, GWL_STYLE, GetWindowLongPtrW, GetWindowTextW,
    GetWindowThreadProcessId, HWND_NOTOPMOST, HWND_TOPMOST, IsWindow, IsWindowVisible,
    SWP_FRAMECHANGED, SWP_NOACTIVATE, SWP_NOMOVE, SWP_NOSIZE, SWP_NOZORDER, SetWindowLongPtrW,
    SetWindowPos, WS_CAPTION, WS_EX_APPWINDOW, WS_EX_TOOLWINDOW, WS_THICKFRAME,
};
use windows::core::BOOL;

use super::{Capabilities, WindowBackend, WindowHandle, WindowInfo};
use crate::geometry::Rect;
use crate::lock;

/// Original (style, extended style) of a window before stripping
type SavedStyles = (isize, isize);

pub struct Win32Backend {
    saved_styles: Mutex<HashMap<WindowHandle, SavedStyles>>,
}

fn hwnd(handle: WindowHandle) -> HWND {
    HWND(handle.0 as usize as *mut c_void)
}

/// `EnumWindows` callback: push every top-level HWND into the `Vec` behind `lparam`
unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let handles = unsafe { &mut *(lparam.0 as *mut Vec<u64>) };
    handles.push(hwnd.0 as usize as u64);
    BOOL(1)
}

impl Default for Win32Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl Win32Backend {
    pub fn new() -> Self {
        Self {
            saved_styles: Mutex::new(HashMap::new()),
        }
    }

    fn describe(&self, handle: WindowHandle) -> Option<WindowInfo> {
        let window = hwnd(handle);
        unsafe {
            if !IsWindowVisible(window).as_bool() {
                return None;
            }
            let mut pid = 0u32;
            GetWindowThreadProcessId(window, Some(&mut pid));
            let mut buffer = [0u16; 512];
            let len = GetWindowTextW(window, &mut buffer).max(0) as usize;
            Some(WindowInfo {
                handle,
                pid: (pid != 0).then_some(pid),
                title: String::from_utf16_lossy(&buffer[..len]),
            })
        }
    }

    fn set_position_flags(&self, handle: WindowHandle, insert_after: HWND) -> Result<()> {
        unsafe {
            SetWindowPos(
                hwnd(handle),
                Some(insert_after),
                0,
                0,
                0,
                0,
                SWP_NOMOVE | SWP_NOSIZE | SWP_NOACTIVATE,
            )
        }
        .context(format!("SetWindowPos z-order change failed for {handle}"))
    }
}

impl WindowBackend for Win32Backend {
    fn name(&self) -> &'static str {
        "win32"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            position_sync: true,
            decoration_removal: true,
            always_on_top: true,
            taskbar_hiding: true,
        }
    }

    fn list_windows(&self) -> Result<Vec<WindowInfo>> {
        let mut handles: Vec<u64> = Vec::new();
        unsafe { EnumWindows(Some(collect_window), LPARAM(&mut handles as *mut Vec<u64> as isize)) }
            .context("EnumWindows failed")?;
        // EnumWindows walks the z-order top-down and new windows open on top,
        // so reversing gives an oldest-first listing
        Ok(handles
            .into_iter()
            .rev()
            .filter_map(|h| self.describe(WindowHandle(h)))
            .collect())
    }

    fn is_alive(&self, handle: WindowHandle) -> bool {
        unsafe { IsWindow(Some(hwnd(handle))).as_bool() }
    }

    fn move_resize(&self, handle: WindowHandle, rect: Rect) -> Result<()> {
        unsafe {
            SetWindowPos(
                hwnd(handle),
                None,
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                SWP_NOZORDER | SWP_NOACTIVATE,
            )
        }
        .context(format!("SetWindowPos failed for {handle} with {rect:?}"))
    }

    fn strip_decorations(&self, handle: WindowHandle) -> Result<()> {
        let window = hwnd(handle);
        let (style, ex_style) = unsafe {
            (
                GetWindowLongPtrW(window, GWL_STYLE),
                GetWindowLongPtrW(window, GWL_EXSTYLE),
            )
        };
        lock(&self.saved_styles)
            .entry(handle)
            .or_insert((style, ex_style));

        let chrome = (WS_CAPTION.0 | WS_THICKFRAME.0) as isize;
        let new_ex = (ex_style & !(WS_EX_APPWINDOW.0 as isize)) | WS_EX_TOOLWINDOW.0 as isize;
        unsafe {
            SetWindowLongPtrW(window, GWL_STYLE, style & !chrome);
            SetWindowLongPtrW(window, GWL_EXSTYLE, new_ex);
            SetWindowPos(
                window,
                None,
                0,
                0,
                0,
                0,
                SWP_NOMOVE | SWP_NOSIZE | SWP_NOZORDER | SWP_FRAMECHANGED | SWP_NOACTIVATE,
            )
        }
        .context(format!("Failed to apply stripped frame to {handle}"))?;
        debug!(window = %handle, "Removed caption and frame styles");
        Ok(())
    }

    fn restore_decorations(&self, handle: WindowHandle) -> Result<()> {
        let Some((style, ex_style)) = lock(&self.saved_styles).remove(&handle) else {
            return Ok(());
        };
        let window = hwnd(handle);
        unsafe {
            SetWindowLongPtrW(window, GWL_STYLE, style);
            SetWindowLongPtrW(window, GWL_EXSTYLE, ex_style);
            SetWindowPos(
                window,
                None,
                0,
                0,
                0,
                0,
                SWP_NOMOVE | SWP_NOSIZE | SWP_NOZORDER | SWP_FRAMECHANGED | SWP_NOACTIVATE,
            )
        }
        .context(format!("Failed to restore frame of {handle}"))
    }

    fn set_keep_above(&self, handle: WindowHandle, above: bool) -> Result<()> {
        let insert_after = if above { HWND_TOPMOST } else { HWND_NOTOPMOST };
        self.set_position_flags(handle, insert_after)
    }
}
