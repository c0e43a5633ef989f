//! Scripted stand-in for the NanoWrite window.
//!
//! [`MockApp`] hands out a driver and a screen reader that share one state:
//! every call is recorded in order, and reads replay scripted values. It is
//! public so integration tests and `--mock` server runs can use it.

use super::{InputDriver, KeyCombo, ScreenReader};
use crate::types::{Point, Rect, Rgb, ScreenshotResult};
use crate::NanoWriteError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Focus,
    Click(Point),
    DoubleClick(Point),
    Press(KeyCombo),
    Paste(String),
    FillDialog { title: String, text: String },
    ReadField(Point),
    ReadRegionText(Rect),
    ReadPixel(Point),
    Capture(Rect),
}

impl MockCall {
    /// Whether the call changes the target window.
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            MockCall::Click(_)
                | MockCall::DoubleClick(_)
                | MockCall::Press(_)
                | MockCall::Paste(_)
                | MockCall::FillDialog { .. }
        )
    }
}

/// What a reaction writes to the message panel besides its fixed lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    /// The `MessageOut` lines of the last pasted script
    PastedMessages,
    /// `Loading <path>` for the last dialog entry
    DialogText,
    /// The `MessageOut` lines of the file named in the last dialog entry
    DialogFileMessages,
}

#[derive(Debug, Clone)]
struct Reaction {
    echo: Option<Echo>,
    lines: Vec<String>,
}

const ECHO_STAMP: &str = "[12:00:00]";

fn message_outs(script: &str) -> impl Iterator<Item = String> + '_ {
    script
        .lines()
        .filter_map(|l| l.trim().strip_prefix("MessageOut "))
        .map(|m| format!("{ECHO_STAMP} {m}"))
}

/// Values replayed in order; the last one repeats forever.
#[derive(Debug, Default)]
struct Script(VecDeque<String>);

impl Script {
    fn next(&mut self) -> Option<String> {
        if self.0.len() > 1 {
            self.0.pop_front()
        } else {
            self.0.front().cloned()
        }
    }
}

#[derive(Debug)]
struct MockState {
    calls: Vec<MockCall>,
    title: String,
    available: bool,
    fields: HashMap<Point, Script>,
    log_frames: Script,
    pixels: HashMap<Point, Rgb>,
    toggles: HashMap<Point, (Rgb, Rgb)>,
    click_reactions: HashMap<Point, Vec<Reaction>>,
    key_reactions: HashMap<KeyCombo, Vec<Reaction>>,
    dialog_available: bool,
    last_paste: String,
    last_dialog: String,
}

impl MockState {
    fn react(&mut self, reactions: Vec<Reaction>) {
        for reaction in reactions {
            let mut lines: Vec<String> = match reaction.echo {
                None => Vec::new(),
                Some(Echo::PastedMessages) => message_outs(&self.last_paste).collect(),
                Some(Echo::DialogText) => vec![format!("{ECHO_STAMP} Loading {}", self.last_dialog)],
                Some(Echo::DialogFileMessages) => std::fs::read_to_string(&self.last_dialog)
                    .map(|text| message_outs(&text).collect())
                    .unwrap_or_default(),
            };
            lines.extend(reaction.lines);
            self.append_log(&lines);
        }
    }

    fn append_log(&mut self, lines: &[String]) {
        if self.log_frames.0.is_empty() {
            self.log_frames.0.push_back(String::new());
        }
        for frame in self.log_frames.0.iter_mut() {
            for line in lines {
                if !frame.is_empty() && !frame.ends_with('\n') {
                    frame.push('\n');
                }
                frame.push_str(line);
            }
        }
    }
}

#[derive(Clone)]
pub struct MockApp {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockApp {
    fn default() -> Self {
        Self::new("NanoWrite 1.7.5")
    }
}

impl MockApp {
    pub fn new(title: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                calls: Vec::new(),
                title: title.to_string(),
                available: true,
                fields: HashMap::new(),
                log_frames: Script::default(),
                pixels: HashMap::new(),
                toggles: HashMap::new(),
                click_reactions: HashMap::new(),
                key_reactions: HashMap::new(),
                dialog_available: true,
                last_paste: String::new(),
                last_dialog: String::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // a panicking test thread must not hide the calls recorded so far
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn driver(&self) -> MockDriver {
        MockDriver { app: self.clone() }
    }

    pub fn screen(&self) -> MockScreen {
        MockScreen { app: self.clone() }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    pub fn set_dialog_available(&self, available: bool) {
        self.lock().dialog_available = available;
    }

    /// Successive reads of the field at `at` return `values` in order.
    pub fn script_field<S: Into<String>>(&self, at: Point, values: impl IntoIterator<Item = S>) {
        self.lock().fields.insert(
            at,
            Script(values.into_iter().map(Into::into).collect()),
        );
    }

    /// Successive reads of the message panel return `frames` in order.
    pub fn script_log<S: Into<String>>(&self, frames: impl IntoIterator<Item = S>) {
        self.lock().log_frames = Script(frames.into_iter().map(Into::into).collect());
    }

    pub fn set_pixel(&self, at: Point, color: Rgb) {
        self.lock().pixels.insert(at, color);
    }

    /// Clicking `at` flips the pixel there between `a` and `b`.
    pub fn toggle_on_click(&self, at: Point, a: Rgb, b: Rgb) {
        let mut state = self.lock();
        state.pixels.entry(at).or_insert(a);
        state.toggles.insert(at, (a, b));
    }

    /// Clicking `at` appends `line` to every pending log frame.
    pub fn log_on_click(&self, at: Point, line: impl Into<String>) {
        self.lock().click_reactions.entry(at).or_default().push(Reaction {
            echo: None,
            lines: vec![line.into()],
        });
    }

    /// Pressing `keys` appends `line` to every pending log frame.
    pub fn log_on_key(&self, keys: KeyCombo, line: impl Into<String>) {
        self.lock().key_reactions.entry(keys).or_default().push(Reaction {
            echo: None,
            lines: vec![line.into()],
        });
    }

    /// Clicking `at` logs what `echo` selects, followed by `then`.
    pub fn echo_on_click<S: Into<String>>(&self, at: Point, echo: Echo, then: impl IntoIterator<Item = S>) {
        self.lock().click_reactions.entry(at).or_default().push(Reaction {
            echo: Some(echo),
            lines: then.into_iter().map(Into::into).collect(),
        });
    }

    /// Pressing `keys` logs what `echo` selects, followed by `then`.
    pub fn echo_on_key<S: Into<String>>(&self, keys: KeyCombo, echo: Echo, then: impl IntoIterator<Item = S>) {
        self.lock().key_reactions.entry(keys).or_default().push(Reaction {
            echo: Some(echo),
            lines: then.into_iter().map(Into::into).collect(),
        });
    }

    fn record(&self, call: MockCall) -> Result<MutexGuard<'_, MockState>, NanoWriteError> {
        let mut state = self.lock();
        if !state.available {
            return Err(NanoWriteError::TargetUnavailable(format!(
                "mock window '{}' is closed",
                state.title
            )));
        }
        state.calls.push(call);
        Ok(state)
    }
}

pub struct MockDriver {
    app: MockApp,
}

impl InputDriver for MockDriver {
    fn window_title(&self) -> Result<String, NanoWriteError> {
        let state = self.app.lock();
        if !state.available {
            return Err(NanoWriteError::TargetUnavailable("mock window closed".into()));
        }
        Ok(state.title.clone())
    }

    fn focus_window(&self) -> Result<(), NanoWriteError> {
        self.app.record(MockCall::Focus).map(drop)
    }

    fn click(&self, at: Point) -> Result<(), NanoWriteError> {
        let mut state = self.app.record(MockCall::Click(at))?;
        if let Some((a, b)) = state.toggles.get(&at).copied() {
            let current = state.pixels.get(&at).copied().unwrap_or(a);
            state.pixels.insert(at, if current == a { b } else { a });
        }
        if let Some(reactions) = state.click_reactions.get(&at).cloned() {
            state.react(reactions);
        }
        Ok(())
    }

    fn double_click(&self, at: Point) -> Result<(), NanoWriteError> {
        self.app.record(MockCall::DoubleClick(at)).map(drop)
    }

    fn press(&self, keys: KeyCombo) -> Result<(), NanoWriteError> {
        let mut state = self.app.record(MockCall::Press(keys))?;
        if let Some(reactions) = state.key_reactions.get(&keys).cloned() {
            state.react(reactions);
        }
        Ok(())
    }

    fn paste_text(&self, text: &str) -> Result<(), NanoWriteError> {
        let mut state = self.app.record(MockCall::Paste(text.to_string()))?;
        state.last_paste = text.to_string();
        Ok(())
    }

    fn fill_dialog(&self, title: &str, text: &str) -> Result<(), NanoWriteError> {
        let mut state = self.app.record(MockCall::FillDialog {
            title: title.to_string(),
            text: text.to_string(),
        })?;
        if !state.dialog_available {
            return Err(NanoWriteError::TargetUnavailable(format!(
                "dialog '{title}' did not open"
            )));
        }
        state.last_dialog = text.to_string();
        Ok(())
    }
}

pub struct MockScreen {
    app: MockApp,
}

impl ScreenReader for MockScreen {
    fn read_field(&self, at: Point) -> Result<String, NanoWriteError> {
        let mut state = self.app.record(MockCall::ReadField(at))?;
        Ok(state
            .fields
            .get_mut(&at)
            .and_then(Script::next)
            .unwrap_or_default())
    }

    fn read_region_text(&self, region: Rect) -> Result<String, NanoWriteError> {
        let mut state = self.app.record(MockCall::ReadRegionText(region))?;
        Ok(state.log_frames.next().unwrap_or_default())
    }

    fn read_pixel(&self, at: Point) -> Result<Rgb, NanoWriteError> {
        let state = self.app.record(MockCall::ReadPixel(at))?;
        Ok(state.pixels.get(&at).copied().unwrap_or(Rgb::new(0, 0, 0)))
    }

    fn capture_region(&self, region: Rect) -> Result<ScreenshotResult, NanoWriteError> {
        let state = self.app.record(MockCall::Capture(region))?;
        drop(state);
        let pixels = (region.width * region.height) as usize;
        Ok(ScreenshotResult {
            image_data: [200u8, 200, 200, 255].repeat(pixels),
            width: region.width,
            height: region.height,
        })
    }
}
