use thiserror::Error;

#[derive(Debug, Error)]
#[error("clipboard unavailable: {0}")]
pub struct ClipboardError(String);

impl ClipboardError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

pub trait ClipboardSink {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError>;
}

/// System clipboard via `arboard`.
///
/// The handle is opened lazily and kept: on X11 the copied text is only served
/// while the owning handle is alive.
#[derive(Default)]
pub struct SystemClipboard {
    handle: Option<arboard::Clipboard>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClipboardSink for SystemClipboard {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        if self.handle.is_none() {
            let opened = arboard::Clipboard::new().map_err(|e| ClipboardError(e.to_string()))?;
            self.handle = Some(opened);
        }
        let Some(clipboard) = self.handle.as_mut() else {
            return Err(ClipboardError::new("clipboard handle missing"));
        };

        clipboard
            .set_text(text.to_owned())
            .map_err(|e| ClipboardError(e.to_string()))
    }
}
