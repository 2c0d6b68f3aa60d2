//! Receive window: whether inbound frames are expected right now.
//!
//! The owning scheduler consults this before entering low-power sleep.

use crate::clock::ticks_diff;
use crate::error::SessionError;
use std::time::Duration;

/// Receive window state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RxWindow {
    /// Nothing expected
    #[default]
    Closed,
    /// Frames expected until further notice
    Open,
    /// Frames expected until the given tick
    Until(u32),
}

impl RxWindow {
    /// Window opened at `now_ms`, for `window` or indefinitely
    pub fn open(now_ms: u32, window: Option<Duration>) -> Self {
        match window {
            None => RxWindow::Open,
            Some(window) => {
                let ms = u32::try_from(window.as_millis())
                    .unwrap_or(u32::MAX)
                    .min(i32::MAX as u32);
                RxWindow::Until(now_ms.wrapping_add(ms))
            }
        }
    }

    /// Whether frames are expected at `now_ms`
    pub fn is_open(&self, now_ms: u32) -> bool {
        match *self {
            RxWindow::Closed => false,
            RxWindow::Open => true,
            RxWindow::Until(deadline) => ticks_diff(deadline, now_ms) > 0,
        }
    }
}

/// Parse a window such as `"250ms"`, `"5s"`, `"2min"` or `"1h 30min"`.
///
/// Accepts the same duration grammar as the configuration file.
pub fn parse_window(text: &str) -> Result<Duration, SessionError> {
    let text = text.trim();
    humantime::parse_duration(text)
        .map_err(|err| SessionError::InvalidWindow(format!("{text}: {err}")))
}
