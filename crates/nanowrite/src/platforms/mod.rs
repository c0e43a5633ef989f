use crate::config::Config;
use crate::types::{Point, Rect, Rgb, ScreenshotResult};
use crate::NanoWriteError;

pub mod mock;
#[cfg(target_os = "windows")]
pub mod windows;

/// Key chords the dispatcher needs. Drivers translate them into whatever
/// their input backend expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCombo {
    /// ctrl+end
    CtrlEnd,
    /// shift+ctrl+home
    ShiftCtrlHome,
    Delete,
    Enter,
    /// ctrl+c
    Copy,
}

/// Synthesizes input into the target window. Every position is relative to
/// the window's top-left corner.
pub trait InputDriver: Send {
    /// Title of the target window, e.g. `NanoWrite 1.7.5`.
    fn window_title(&self) -> Result<String, NanoWriteError>;

    /// Restore the target window and bring it to the foreground.
    fn focus_window(&self) -> Result<(), NanoWriteError>;

    fn click(&self, at: Point) -> Result<(), NanoWriteError>;

    fn double_click(&self, at: Point) -> Result<(), NanoWriteError>;

    fn press(&self, keys: KeyCombo) -> Result<(), NanoWriteError>;

    /// Paste `text` at the current caret through the clipboard.
    fn paste_text(&self, text: &str) -> Result<(), NanoWriteError>;

    /// Wait for the modal dialog titled `title` and put `text` into its
    /// edit field. Does not confirm the dialog.
    fn fill_dialog(&self, title: &str, text: &str) -> Result<(), NanoWriteError>;
}

/// Reads back what the target window shows.
pub trait ScreenReader: Send {
    /// Text of a selectable single-line field.
    fn read_field(&self, at: Point) -> Result<String, NanoWriteError>;

    /// All text of a multi-line region such as the message panel.
    fn read_region_text(&self, region: Rect) -> Result<String, NanoWriteError>;

    fn read_pixel(&self, at: Point) -> Result<Rgb, NanoWriteError>;

    fn capture_region(&self, region: Rect) -> Result<ScreenshotResult, NanoWriteError>;
}

/// Create the input driver and screen reader for the current platform
pub fn create_platform(
    config: &Config,
) -> Result<(Box<dyn InputDriver>, Box<dyn ScreenReader>), NanoWriteError> {
    #[cfg(target_os = "windows")]
    {
        let target = windows::WindowsTarget::connect(&config.window_title)?;
        Ok((
            Box::new(windows::WindowsDriver::new(target.clone(), config.settle())),
            Box::new(windows::WindowsScreen::new(target, config.settle())),
        ))
    }
    #[cfg(not(target_os = "windows"))]
    {
        let _ = config;
        Err(NanoWriteError::UnsupportedPlatform(
            "NanoWrite only runs on Windows".to_string(),
        ))
    }
}
