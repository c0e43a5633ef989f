#![allow(clippy::arc_with_non_send_sync)]

//! Input synthesis and screen reads against the real NanoWrite window,
//! through UI Automation for window handling and input, xcap for pixels and
//! the clipboard for text.

use super::{InputDriver, KeyCombo, ScreenReader};
use crate::types::{Point, Rect, Rgb, ScreenshotResult};
use crate::NanoWriteError;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;
use uiautomation::controls::ControlType;
use uiautomation::inputs::Mouse;
use uiautomation::patterns;
use uiautomation::types::Point as UiaPoint;
use uiautomation::{UIAutomation, UIElement};

const FIND_TIMEOUT_MS: u64 = 5000;
const DIALOG_ATTEMPTS: u32 = 20;

// thread-safety
#[derive(Clone)]
pub struct ThreadSafeWinUIAutomation(Arc<UIAutomation>);

// send and sync for wrapper
unsafe impl Send for ThreadSafeWinUIAutomation {}
unsafe impl Sync for ThreadSafeWinUIAutomation {}

#[derive(Clone)]
pub struct ThreadSafeWinUIElement(Arc<UIElement>);

unsafe impl Send for ThreadSafeWinUIElement {}
unsafe impl Sync for ThreadSafeWinUIElement {}

/// The NanoWrite main window, shared by the driver and the screen reader.
#[derive(Clone)]
pub struct WindowsTarget {
    automation: ThreadSafeWinUIAutomation,
    window: ThreadSafeWinUIElement,
    title: String,
}

impl WindowsTarget {
    /// Locate the top-level window whose title contains `title`.
    pub fn connect(title: &str) -> Result<Self, NanoWriteError> {
        let automation = UIAutomation::new()
            .map_err(|e| NanoWriteError::PlatformError(e.to_string()))?;
        let root = automation
            .get_root_element()
            .map_err(|e| NanoWriteError::PlatformError(e.to_string()))?;
        let window = automation
            .create_matcher()
            .from_ref(&root)
            .control_type(ControlType::Window)
            .depth(2)
            .timeout(FIND_TIMEOUT_MS)
            .contains_name(title)
            .find_first()
            .map_err(|e| {
                NanoWriteError::TargetUnavailable(format!("no window titled '{title}': {e}"))
            })?;
        let full_title = window.get_name().unwrap_or_else(|_| title.to_string());
        debug!("connected to window '{}'", full_title);

        Ok(Self {
            automation: ThreadSafeWinUIAutomation(Arc::new(automation)),
            window: ThreadSafeWinUIElement(Arc::new(window)),
            title: full_title,
        })
    }

    fn origin(&self) -> Result<(i32, i32), NanoWriteError> {
        let rect = self
            .window
            .0
            .get_bounding_rectangle()
            .map_err(|e| NanoWriteError::TargetUnavailable(e.to_string()))?;
        Ok((rect.get_left(), rect.get_top()))
    }

    fn screen_point(&self, at: Point) -> Result<UiaPoint, NanoWriteError> {
        let (left, top) = self.origin()?;
        Ok(UiaPoint::new(left + at.x, top + at.y))
    }

    fn focus(&self) -> Result<(), NanoWriteError> {
        if let Ok(pattern) = self.window.0.get_pattern::<patterns::UIWindowPattern>() {
            // a minimized LabView panel ignores synthesized clicks
            let _ = pattern.set_window_visual_state(uiautomation::types::WindowVisualState::Normal);
        }
        self.window
            .0
            .set_focus()
            .map_err(|e| NanoWriteError::TargetUnavailable(e.to_string()))
    }

    fn send_keys(&self, keys: &str) -> Result<(), NanoWriteError> {
        self.window
            .0
            .send_keys(keys, 10)
            .map_err(|e| NanoWriteError::PlatformError(format!("Failed to press key: {e:?}")))
    }

    fn click(&self, at: Point) -> Result<(), NanoWriteError> {
        let point = self.screen_point(at)?;
        debug!("clicking at ({}, {})", point.get_x(), point.get_y());
        Mouse::default()
            .click(point)
            .map_err(|e| NanoWriteError::PlatformError(e.to_string()))
    }

    fn double_click(&self, at: Point) -> Result<(), NanoWriteError> {
        let point = self.screen_point(at)?;
        Mouse::default()
            .double_click(point)
            .map_err(|e| NanoWriteError::PlatformError(e.to_string()))
    }

    /// Grab the whole window as an RGBA image.
    fn capture_window(&self) -> Result<image::RgbaImage, NanoWriteError> {
        let windows = xcap::Window::all()
            .map_err(|e| NanoWriteError::PlatformError(format!("Failed to get windows: {e}")))?;
        let window = windows
            .into_iter()
            .find(|w| w.title().map(|t| t == self.title).unwrap_or(false))
            .ok_or_else(|| {
                NanoWriteError::TargetUnavailable(format!("window '{}' not capturable", self.title))
            })?;
        window
            .capture_image()
            .map_err(|e| NanoWriteError::PlatformError(format!("Failed to capture window: {e}")))
    }

    fn clipboard_text(&self) -> Result<String, NanoWriteError> {
        let mut clipboard = arboard::Clipboard::new()
            .map_err(|e| NanoWriteError::PlatformError(format!("clipboard unavailable: {e}")))?;
        clipboard
            .get_text()
            .map_err(|e| NanoWriteError::ParseFailure(format!("clipboard holds no text: {e}")))
    }
}

fn key_sequence(keys: KeyCombo) -> &'static str {
    match keys {
        KeyCombo::CtrlEnd => "{ctrl}{end}",
        KeyCombo::ShiftCtrlHome => "{shift}{ctrl}{home}",
        KeyCombo::Delete => "{delete}",
        KeyCombo::Enter => "{enter}",
        KeyCombo::Copy => "{ctrl}c",
    }
}

pub struct WindowsDriver {
    target: WindowsTarget,
    settle: Duration,
}

impl WindowsDriver {
    pub fn new(target: WindowsTarget, settle: Duration) -> Self {
        Self { target, settle }
    }

    fn find_dialog(&self, title: &str) -> Result<UIElement, NanoWriteError> {
        let root = self
            .target
            .automation
            .0
            .get_root_element()
            .map_err(|e| NanoWriteError::PlatformError(e.to_string()))?;
        self.target
            .automation
            .0
            .create_matcher()
            .from_ref(&root)
            .control_type(ControlType::Window)
            .depth(3)
            .timeout(FIND_TIMEOUT_MS)
            .name(title)
            .find_first()
            .map_err(|e| NanoWriteError::TargetUnavailable(format!("dialog '{title}': {e}")))
    }
}

impl InputDriver for WindowsDriver {
    fn window_title(&self) -> Result<String, NanoWriteError> {
        Ok(self.target.title.clone())
    }

    fn focus_window(&self) -> Result<(), NanoWriteError> {
        self.target.focus()
    }

    fn click(&self, at: Point) -> Result<(), NanoWriteError> {
        self.target.click(at)
    }

    fn double_click(&self, at: Point) -> Result<(), NanoWriteError> {
        self.target.double_click(at)
    }

    fn press(&self, keys: KeyCombo) -> Result<(), NanoWriteError> {
        self.target.send_keys(key_sequence(keys))
    }

    fn paste_text(&self, text: &str) -> Result<(), NanoWriteError> {
        let mut clipboard = arboard::Clipboard::new()
            .map_err(|e| NanoWriteError::PlatformError(format!("clipboard unavailable: {e}")))?;
        clipboard
            .set_text(text.to_string())
            .map_err(|e| NanoWriteError::PlatformError(format!("clipboard write failed: {e}")))?;
        thread::sleep(self.settle);
        self.target.send_keys("{ctrl}v")
    }

    fn fill_dialog(&self, title: &str, text: &str) -> Result<(), NanoWriteError> {
        // The file dialog opens asynchronously and LabView sometimes swallows
        // the first value, so set it until it reads back unchanged.
        for attempt in 1..=DIALOG_ATTEMPTS {
            thread::sleep(self.settle);
            let Ok(dialog) = self.find_dialog(title) else {
                debug!("dialog '{}' not open yet (attempt {})", title, attempt);
                continue;
            };
            let edit = self
                .target
                .automation
                .0
                .create_matcher()
                .from_ref(&dialog)
                .control_type(ControlType::Edit)
                .timeout(FIND_TIMEOUT_MS)
                .find_first()
                .map_err(|e| NanoWriteError::PlatformError(format!("no edit field: {e}")))?;
            let value = edit
                .get_pattern::<patterns::UIValuePattern>()
                .map_err(|e| NanoWriteError::PlatformError(e.to_string()))?;
            if value.set_value(text).is_err() {
                continue;
            }
            if value.get_value().map(|v| v == text).unwrap_or(false) {
                let _ = dialog.set_focus();
                return Ok(());
            }
        }
        Err(NanoWriteError::TargetUnavailable(format!(
            "could not fill dialog '{title}'"
        )))
    }
}

pub struct WindowsScreen {
    target: WindowsTarget,
    settle: Duration,
}

impl WindowsScreen {
    pub fn new(target: WindowsTarget, settle: Duration) -> Self {
        Self { target, settle }
    }
}

impl ScreenReader for WindowsScreen {
    fn read_field(&self, at: Point) -> Result<String, NanoWriteError> {
        // LabView indicators are not exposed to UI Automation; selecting the
        // value and copying it is the only way to get at the text.
        self.target.focus()?;
        self.target.double_click(at)?;
        thread::sleep(self.settle);
        self.target.send_keys(key_sequence(KeyCombo::Copy))?;
        thread::sleep(self.settle);
        self.target.clipboard_text()
    }

    fn read_region_text(&self, region: Rect) -> Result<String, NanoWriteError> {
        self.target.focus()?;
        self.target.click(region.center())?;
        self.target.send_keys("{ctrl}a")?;
        thread::sleep(self.settle);
        self.target.send_keys(key_sequence(KeyCombo::Copy))?;
        thread::sleep(self.settle);
        self.target.clipboard_text()
    }

    fn read_pixel(&self, at: Point) -> Result<Rgb, NanoWriteError> {
        self.target.focus()?;
        let image = self.target.capture_window()?;
        let (x, y) = (u32::try_from(at.x), u32::try_from(at.y));
        match (x, y) {
            (Ok(x), Ok(y)) if x < image.width() && y < image.height() => {
                let [r, g, b, _] = image.get_pixel(x, y).0;
                Ok(Rgb::new(r, g, b))
            }
            _ => Err(NanoWriteError::InvalidArgument(format!(
                "pixel ({}, {}) outside the {}x{} window",
                at.x,
                at.y,
                image.width(),
                image.height()
            ))),
        }
    }

    fn capture_region(&self, region: Rect) -> Result<ScreenshotResult, NanoWriteError> {
        self.target.focus()?;
        let image = self.target.capture_window()?;
        let x = region.x.max(0) as u32;
        let y = region.y.max(0) as u32;
        let width = region.width.min(image.width().saturating_sub(x));
        let height = region.height.min(image.height().saturating_sub(y));
        let cropped = image::imageops::crop_imm(&image, x, y, width, height).to_image();
        Ok(ScreenshotResult {
            width: cropped.width(),
            height: cropped.height(),
            image_data: cropped.into_raw(),
        })
    }
}
