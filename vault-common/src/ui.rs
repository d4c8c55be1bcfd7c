//! The display contract.
//!
//! Rendering is out of scope for the core: the LCD stack is an external
//! collaborator that consumes [`Screen`] values. Render calls are fire and
//! forget; any resulting user input comes back through the event bus as UI
//! events.

/// A render request handed to the display collaborator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Screen {
    /// A short message with an implicit "ok".
    Message { text: String },
    /// A heading plus body, e.g. "Tap card #2" / "Place card below".
    Instruction { heading: String, body: String },
    /// A yes/no prompt.
    Confirm { prompt: String },
    /// Free-text entry; `obscured` for PINs.
    TextInput {
        prompt: String,
        obscured: bool,
        max_len: usize,
    },
    /// A scrollable choice list.
    List { heading: String, items: Vec<String> },
    /// Rotating informational slides (e.g. during proof-of-work).
    Slideshow { slides: Vec<String> },
    /// A full-screen error.
    Error { text: String },
}

/// Where render requests go. Implemented by the LVGL bridge on the real
/// device and by a recording stub in tests.
pub trait UiHost {
    fn render(&mut self, screen: Screen);
}

/// A no-op display for headless operation.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeadlessUi;

impl UiHost for HeadlessUi {
    fn render(&mut self, _screen: Screen) {}
}
