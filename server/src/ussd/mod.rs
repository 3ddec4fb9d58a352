//! Interactive USSD sessions
//!
//! This module handles:
//! - One live dialogue per device, superseding on restart
//! - Prompt parsing for menu options and completion markers
//! - Idle expiry through a background sweeper

mod manager;
mod options;
mod session;
mod sweep;

pub use manager::SessionManager;
pub use options::{quick_options, TerminalMatcher, DEFAULT_TERMINAL_MARKERS};
pub use session::{InteractiveSession, SessionIdGenerator, SessionSnapshot, SessionState};
pub use sweep::SessionSweeper;
