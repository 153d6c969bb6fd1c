use std::fmt;

use crate::state::Style;

/// External input the frame reacts to, whatever delivered it (buttons,
/// control socket, signals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    /// Show the next photo now.
    Advance,
    /// Run a sync outside the midnight schedule.
    SyncNow,
    /// Persist a new display style; takes effect on the next render.
    SetStyle(Style),
}

/// Why a sync is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Midnight,
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Midnight => "midnight",
            Self::Manual => "manual",
        })
    }
}
