// Authentication module
// Token storage, refresh coordination and end-of-session navigation

mod manager;
mod navigator;
mod refresh;
mod store;
mod types;

pub use manager::SessionManager;
pub use navigator::{Navigator, TerminalNavigator, LOGIN_ROUTE};
pub use refresh::REFRESH_PATH;
pub use store::TokenStore;
pub use types::{Credentials, LoginRequest, LoginResponse, TokenUpdate};
