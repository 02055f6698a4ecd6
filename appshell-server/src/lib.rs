//! appshell-server: page-table web application shell
//!
//! Applications register page handlers by name on an [`AppShellBuilder`];
//! the page table (built-in pages, application defaults, configuration)
//! decides which routes and methods reach them. The shell adds:
//! - layered templates and per-file static routes
//! - optional login backed by a stub or RADIUS user controller
//! - a WebSocket channel with one background handler per namespace
//! - a token-gated remote shutdown endpoint

pub mod error;
pub mod handlers;
pub mod realtime;
pub mod request_log;
pub mod session;
pub mod shell;
pub mod state;

pub use error::{ShellError, return_error};
pub use realtime::{RealtimeContext, RealtimeHandler, RealtimeHub};
pub use shell::{AppShell, AppShellBuilder, ShellState};
pub use state::AppState;
