//! UI state and the event loop.
//!
//! Start and stop never run on the UI thread. They are spawned on the tokio
//! runtime and their results come back as [`Outcome`] messages, which the
//! loop drains before every frame.

use std::collections::HashSet;
use std::io::Stdout;
use std::sync::Arc;
use std::sync::mpsc;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::Terminal;
use ratatui::prelude::*;
use tokio::runtime::Handle;
use tracing::debug;

use ports_config::Profile;
use ports_supervisor::Supervisor;

use crate::terminal::POLL_DURATION;
use crate::view;

/// Result of a start or stop that ran on a worker task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Started {
        name: String,
        result: Result<u32, String>,
    },
    Stopped {
        name: String,
        result: Result<(), String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStatus {
    Stopped,
    Starting,
    Running(u32),
}

impl TunnelStatus {
    pub fn label(&self) -> String {
        match self {
            TunnelStatus::Stopped => "stopped".to_string(),
            TunnelStatus::Starting => "starting".to_string(),
            TunnelStatus::Running(pid) => format!("run:{}", pid),
        }
    }
}

pub struct App {
    profiles: Vec<Profile>,
    cursor: usize,
    supervisor: Arc<Supervisor>,
    runtime: Handle,
    outcome_tx: mpsc::Sender<Outcome>,
    outcome_rx: mpsc::Receiver<Outcome>,
    /// Profiles with a start in flight.
    starting: HashSet<String>,
    pub info: Option<String>,
    pub error: Option<String>,
    pub should_quit: bool,
}

impl App {
    pub fn new(profiles: Vec<Profile>, supervisor: Arc<Supervisor>, runtime: Handle) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::channel();
        Self {
            profiles,
            cursor: 0,
            supervisor,
            runtime,
            outcome_tx,
            outcome_rx,
            starting: HashSet::new(),
            info: None,
            error: None,
            should_quit: false,
        }
    }

    /// Main event loop -- blocks until the user quits
    pub fn run(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> anyhow::Result<()> {
        while !self.should_quit {
            self.drain_outcomes();

            terminal.draw(|frame| view::render(frame, self))?;

            if event::poll(POLL_DURATION)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key);
                    }
                }
            }
        }

        Ok(())
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn selected(&self) -> Option<&Profile> {
        self.profiles.get(self.cursor)
    }

    pub fn status_of(&self, name: &str) -> TunnelStatus {
        if let Some(pid) = self.supervisor.is_running(name) {
            TunnelStatus::Running(pid)
        } else if self.starting.contains(name) {
            TunnelStatus::Starting
        } else {
            TunnelStatus::Stopped
        }
    }

    pub fn logs(&self, name: &str) -> Vec<String> {
        self.supervisor.logs(name)
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Up | KeyCode::Char('k') => {
                self.cursor = self.cursor.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.cursor + 1 < self.profiles.len() {
                    self.cursor += 1;
                }
            }
            KeyCode::Enter | KeyCode::Char('s') => self.toggle_selected(),
            KeyCode::Char('S') => {
                self.supervisor.stop_all();
                self.starting.clear();
                self.set_info("stopped all tunnels".to_string());
            }
            _ => {}
        }
    }

    /// Applies every outcome the workers have reported so far.
    pub fn drain_outcomes(&mut self) {
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            self.apply(outcome);
        }
    }

    pub fn apply(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Started { name, result } => {
                self.starting.remove(&name);
                match result {
                    Ok(pid) => self.set_info(format!("started {} (pid {})", name, pid)),
                    Err(e) => self.set_error(format!("start {}: {}", name, e)),
                }
            }
            Outcome::Stopped { name, result } => match result {
                Ok(()) => self.set_info(format!("stopped {}", name)),
                Err(e) => self.set_error(format!("stop {}: {}", name, e)),
            },
        }
    }

    fn toggle_selected(&mut self) {
        let Some(profile) = self.selected().cloned() else {
            return;
        };

        if self.supervisor.is_running(&profile.name).is_some() {
            self.dispatch_stop(profile.name);
        } else {
            self.dispatch_start(profile);
        }
    }

    fn dispatch_start(&mut self, profile: Profile) {
        debug!("Dispatching start for '{}'", profile.name);
        self.starting.insert(profile.name.clone());

        let supervisor = Arc::clone(&self.supervisor);
        let tx = self.outcome_tx.clone();
        self.runtime.spawn(async move {
            let result = supervisor.start(&profile).await.map_err(|e| e.to_string());
            let _ = tx.send(Outcome::Started {
                name: profile.name,
                result,
            });
        });
    }

    fn dispatch_stop(&mut self, name: String) {
        debug!("Dispatching stop for '{}'", name);

        let supervisor = Arc::clone(&self.supervisor);
        let tx = self.outcome_tx.clone();
        self.runtime.spawn(async move {
            let result = supervisor.stop(&name).map_err(|e| e.to_string());
            let _ = tx.send(Outcome::Stopped { name, result });
        });
    }

    fn set_info(&mut self, msg: String) {
        self.info = Some(msg);
        self.error = None;
    }

    fn set_error(&mut self, msg: String) {
        self.error = Some(msg);
        self.info = None;
    }
}
