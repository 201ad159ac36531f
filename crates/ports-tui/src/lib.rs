//! Interactive terminal UI for starting and stopping tunnels.
//!
//! - **`app`** - UI state, key handling and the worker dispatch for start/stop
//! - **`view`** - ratatui rendering of the profile list and detail pane
//! - **`terminal`** - terminal setup/teardown and panic hook

use std::sync::Arc;
use tokio::runtime::Handle;

use ports_config::Profile;
use ports_supervisor::Supervisor;

pub mod app;
pub mod terminal;
pub mod view;

pub use app::{App, Outcome, TunnelStatus};

/// Runs the UI until the user quits. Blocks the calling thread; supervisor
/// calls are dispatched onto `runtime`.
pub fn run(profiles: Vec<Profile>, supervisor: Arc<Supervisor>, runtime: Handle) -> anyhow::Result<()> {
    terminal::install_panic_hook();
    let mut term = terminal::setup_terminal()?;

    let mut app = App::new(profiles, supervisor, runtime);
    let result = app.run(&mut term);

    terminal::restore_terminal(&mut term)?;
    result
}
