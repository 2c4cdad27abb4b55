//! X11 backend over EWMH: client list scan, `_NET_WM_PID` ownership, Motif
//! hints for chrome, `_NET_WM_STATE` client messages for stacking
//!
//! Also serves XWayland sessions, where only X11 clients are reachable.

use anyhow::{Context, Result};
use tracing::{debug, info};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as WrapperExt;

use super::{Capabilities, WindowBackend, WindowHandle, WindowInfo};
use crate::constants::x11;
use crate::geometry::Rect;

/// Pre-cached X11 atoms to avoid repeated roundtrips
pub struct CachedAtoms {
    pub wm_name: Atom,
    pub net_wm_name: Atom,
    pub utf8_string: Atom,
    pub net_wm_pid: Atom,
    pub net_client_list: Atom,
    pub net_wm_state: Atom,
    pub net_wm_state_above: Atom,
    pub net_wm_state_skip_taskbar: Atom,
    pub net_wm_state_skip_pager: Atom,
    pub motif_wm_hints: Atom,
}

fn intern(conn: &RustConnection, name: &str) -> Result<Atom> {
    Ok(conn
        .intern_atom(false, name.as_bytes())
        .context(format!("Failed to intern {name} atom"))?
        .reply()
        .context(format!("Failed to get reply for {name} atom"))?
        .atom)
}

impl CachedAtoms {
    pub fn new(conn: &RustConnection) -> Result<Self> {
        // Do all intern_atom roundtrips once at startup
        Ok(Self {
            wm_name: intern(conn, "WM_NAME")?,
            net_wm_name: intern(conn, "_NET_WM_NAME")?,
            utf8_string: intern(conn, "UTF8_STRING")?,
            net_wm_pid: intern(conn, "_NET_WM_PID")?,
            net_client_list: intern(conn, "_NET_CLIENT_LIST")?,
            net_wm_state: intern(conn, "_NET_WM_STATE")?,
            net_wm_state_above: intern(conn, "_NET_WM_STATE_ABOVE")?,
            net_wm_state_skip_taskbar: intern(conn, "_NET_WM_STATE_SKIP_TASKBAR")?,
            net_wm_state_skip_pager: intern(conn, "_NET_WM_STATE_SKIP_PAGER")?,
            motif_wm_hints: intern(conn, "_MOTIF_WM_HINTS")?,
        })
    }
}

/// X11 backend; `RustConnection` is internally synchronized, so one
/// connection serves both the control thread and the sync thread
pub struct X11Backend {
    conn: RustConnection,
    root: Window,
    atoms: CachedAtoms,
}

fn window_id(handle: WindowHandle) -> Result<Window> {
    Window::try_from(handle.0).context(format!("{handle} is not an X11 window id"))
}

impl X11Backend {
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None)
            .context("Failed to connect to X11 server. Is DISPLAY set correctly?")?;
        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        info!(
            screen = screen_num,
            width = screen.width_in_pixels,
            height = screen.height_in_pixels,
            "Connected to X11 server"
        );
        let atoms = CachedAtoms::new(&conn).context("Failed to cache X11 atoms at startup")?;
        Ok(Self { conn, root, atoms })
    }

    /// Managed windows from the EWMH client list, in mapping order
    fn client_list(&self) -> Result<Vec<Window>> {
        let prop = self
            .conn
            .get_property(
                false,
                self.root,
                self.atoms.net_client_list,
                AtomEnum::WINDOW,
                0,
                u32::MAX,
            )
            .context("Failed to query _NET_CLIENT_LIST property")?
            .reply()
            .context("Failed to get window list from X11 server")?;
        Ok(prop.value32().map(|v| v.collect()).unwrap_or_default())
    }

    /// Fallback for window managers without EWMH: viewable children of root
    fn viewable_top_levels(&self) -> Result<Vec<Window>> {
        let tree = self
            .conn
            .query_tree(self.root)
            .context("Failed to query root window tree")?
            .reply()
            .context("Failed to get root window tree reply")?;
        Ok(tree
            .children
            .into_iter()
            .filter(|&w| {
                self.conn
                    .get_window_attributes(w)
                    .ok()
                    .and_then(|cookie| cookie.reply().ok())
                    .is_some_and(|attrs| attrs.map_state == MapState::VIEWABLE)
            })
            .collect())
    }

    fn window_pid(&self, window: Window) -> Result<Option<u32>> {
        let prop = self
            .conn
            .get_property(false, window, self.atoms.net_wm_pid, AtomEnum::CARDINAL, 0, 1)
            .context(format!("Failed to query _NET_WM_PID property for window {window}"))?
            .reply()
            .context(format!("Failed to get _NET_WM_PID reply for window {window}"))?;
        if prop.value.len() < x11::PID_PROPERTY_SIZE {
            return Ok(None);
        }
        Ok(prop.value32().and_then(|mut v| v.next()))
    }

    fn window_title(&self, window: Window) -> Result<String> {
        for (property, kind) in [
            (self.atoms.net_wm_name, self.atoms.utf8_string),
            (self.atoms.wm_name, AtomEnum::ANY.into()),
        ] {
            let prop = self
                .conn
                .get_property(false, window, property, kind, 0, x11::TITLE_MAX_LONG_LENGTH)
                .context(format!("Failed to query title property for window {window}"))?
                .reply()
                .context(format!("Failed to get title reply for window {window}"))?;
            if !prop.value.is_empty() {
                return Ok(String::from_utf8_lossy(&prop.value).into_owned());
            }
        }
        Ok(String::new())
    }

    fn describe(&self, window: Window) -> Result<WindowInfo> {
        Ok(WindowInfo {
            handle: WindowHandle(u64::from(window)),
            pid: self.window_pid(window)?,
            title: self.window_title(window)?,
        })
    }

    /// Ask the window manager to add or remove `_NET_WM_STATE` entries
    fn send_wm_state(&self, window: Window, action: u32, first: Atom, second: Atom) -> Result<()> {
        let event = ClientMessageEvent {
            response_type: CLIENT_MESSAGE_EVENT,
            format: 32,
            sequence: 0,
            window,
            type_: self.atoms.net_wm_state,
            data: ClientMessageData::from([action, first, second, x11::SOURCE_INDICATION_PAGER, 0]),
        };

        self.conn
            .send_event(
                false,
                self.root,
                EventMask::SUBSTRUCTURE_NOTIFY | EventMask::SUBSTRUCTURE_REDIRECT,
                event,
            )
            .context(format!("Failed to send _NET_WM_STATE event for window {window}"))?;
        self.conn
            .flush()
            .context("Failed to flush X11 connection after _NET_WM_STATE event")?;
        Ok(())
    }

    fn set_motif_decorations(&self, window: Window, decorations: u32) -> Result<()> {
        let hints: [u32; x11::MWM_HINTS_ELEMENTS] =
            [x11::MWM_HINTS_DECORATIONS, 0, decorations, 0, 0];
        self.conn
            .change_property32(
                PropMode::REPLACE,
                window,
                self.atoms.motif_wm_hints,
                self.atoms.motif_wm_hints,
                &hints,
            )
            .context(format!("Failed to set _MOTIF_WM_HINTS for window {window}"))?
            .check()
            .context(format!("X11 rejected _MOTIF_WM_HINTS for window {window}"))?;
        Ok(())
    }
}

impl WindowBackend for X11Backend {
    fn name(&self) -> &'static str {
        "x11"
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
        let mut windows = self.client_list()?;
        if windows.is_empty() {
            debug!("_NET_CLIENT_LIST empty, falling back to root window tree");
            windows = self.viewable_top_levels()?;
        }
        Ok(windows
            .into_iter()
            .filter_map(|w| {
                // Windows may vanish between listing and querying
                self.describe(w)
                    .inspect_err(|e| debug!(window = w, error = %e, "Skipping window"))
                    .ok()
            })
            .collect())
    }

    fn is_alive(&self, handle: WindowHandle) -> bool {
        let Ok(window) = window_id(handle) else {
            return false;
        };
        self.conn
            .get_window_attributes(window)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .is_some()
    }

    fn move_resize(&self, handle: WindowHandle, rect: Rect) -> Result<()> {
        let window = window_id(handle)?;
        let width = u32::try_from(rect.width).context("Negative window width")?;
        let height = u32::try_from(rect.height).context("Negative window height")?;
        self.conn
            .configure_window(
                window,
                &ConfigureWindowAux::new()
                    .x(rect.x)
                    .y(rect.y)
                    .width(width)
                    .height(height),
            )
            .context(format!("Failed to configure window {window}"))?
            .check()
            .context(format!("X11 rejected geometry {rect:?} for window {window}"))?;
        Ok(())
    }

    fn strip_decorations(&self, handle: WindowHandle) -> Result<()> {
        let window = window_id(handle)?;
        self.set_motif_decorations(window, x11::MWM_DECOR_NONE)?;
        self.send_wm_state(
            window,
            x11::NET_WM_STATE_ADD,
            self.atoms.net_wm_state_skip_taskbar,
            self.atoms.net_wm_state_skip_pager,
        )
    }

    fn restore_decorations(&self, handle: WindowHandle) -> Result<()> {
        let window = window_id(handle)?;
        self.set_motif_decorations(window, x11::MWM_DECOR_ALL)?;
        self.send_wm_state(
            window,
            x11::NET_WM_STATE_REMOVE,
            self.atoms.net_wm_state_skip_taskbar,
            self.atoms.net_wm_state_skip_pager,
        )
    }

    fn set_keep_above(&self, handle: WindowHandle, above: bool) -> Result<()> {
        let window = window_id(handle)?;
        let action = if above {
            x11::NET_WM_STATE_ADD
        } else {
            x11::NET_WM_STATE_REMOVE
        };
        self.send_wm_state(window, action, self.atoms.net_wm_state_above, x11rb::NONE)
    }
}
