// Navigation capability used when a session ends

use anyhow::Result;

/// Unauthenticated entry point
pub const LOGIN_ROUTE: &str = "/app/login";

/// Something able to move the user to another view.
/// Environments without one (batch jobs, tests) simply install none.
pub trait Navigator: Send + Sync {
    /// Replace the current view with `route`
    fn replace(&self, route: &str) -> Result<()>;
}

/// Navigator for terminal sessions: tells the user to log in again
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn replace(&self, route: &str) -> Result<()> {
        eprintln!("Session ended, log in again ({})", route);
        Ok(())
    }
}
