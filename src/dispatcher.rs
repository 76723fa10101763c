//! Turns an invocation's argv into a popup toggle.
//!
//! Dispatch never fails from the invoker's point of view: errors and panics
//! are logged, appended to the diagnostic log and reported back as a message,
//! and the exit code stays 0.

use crate::error::PopupError;
use crate::panel_manager::{
    AppContext, Category, PanelManager, SurfaceEvent, ToggleOutcome, WindowRegistry,
};
use capy_tasks::error::panic_message;
use chrono::Local;
use log::{debug, error, info, warn};
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

/// What a dispatch did.
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    /// No category given; the daemon just stays resident.
    Idle,
    Opened(Category),
    Closed(Category),
    Raised(Category),
    Unknown {
        name: String,
        available: Vec<String>,
    },
    Failed(String),
}

impl DispatchOutcome {
    /// Text for the invoker's stderr, if any.
    pub fn message(&self) -> Option<String> {
        match self {
            DispatchOutcome::Unknown { name, available } => Some(format!(
                "{}. Available: {}",
                PopupError::UnknownCategory(name.clone()),
                available.join(", ")
            )),
            DispatchOutcome::Failed(message) => Some(message.clone()),
            _ => None,
        }
    }
}

/// Append-only log of dispatch failures, kept next to the normal log output.
pub struct DiagnosticLog {
    path: PathBuf,
}

impl DiagnosticLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn record(&self, message: &str) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| {
                writeln!(
                    file,
                    "[{}] {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S"),
                    message
                )
            });
        if let Err(e) = result {
            warn!("Failed to write diagnostic log {}: {}", self.path.display(), e);
        }
    }
}

pub struct CommandDispatcher {
    app: AppContext,
    panels: PanelManager,
    registry: WindowRegistry,
    diagnostics: DiagnosticLog,
}

impl CommandDispatcher {
    pub fn new(app: AppContext, panels: PanelManager, registry: WindowRegistry) -> Self {
        let diagnostics = DiagnosticLog::new(app.config.diagnostic_log.clone());
        Self {
            app,
            panels,
            registry,
            diagnostics,
        }
    }

    pub fn registry(&self) -> &WindowRegistry {
        &self.registry
    }

    pub fn app(&self) -> &AppContext {
        &self.app
    }

    /// Dispatch `argv` (program name first). Always returns exit code 0.
    pub fn dispatch(&self, argv: &[String]) -> i32 {
        let outcome = self.dispatch_outcome(argv);
        debug!("Dispatch {:?} -> {:?}", argv, outcome);
        0
    }

    pub fn dispatch_outcome(&self, argv: &[String]) -> DispatchOutcome {
        let Some(name) = argv.get(1).filter(|name| !name.is_empty()) else {
            debug!("No popup requested");
            return DispatchOutcome::Idle;
        };
        if argv.len() > 2 {
            warn!("Ignoring extra arguments {:?}", &argv[2..]);
        }

        match panic::catch_unwind(AssertUnwindSafe(|| self.toggle(name))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => self.fail(format!("Failed to toggle popup '{}': {}", name, e)),
            Err(payload) => self.fail(format!(
                "Panic while toggling popup '{}': {}",
                name,
                panic_message(payload.as_ref())
            )),
        }
    }

    /// Forward a surface interaction to the popup it belongs to.
    pub fn handle_action(&self, event: SurfaceEvent) {
        let Some(window) = self.registry.get(&event.category) else {
            debug!("Action {:?} for closed popup '{}'", event.action, event.category);
            return;
        };
        let category = event.category;
        let action = event.action;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| window.handle_action(action))) {
            self.fail(format!(
                "Panic while handling action for popup '{}': {}",
                category,
                panic_message(payload.as_ref())
            ));
        }
    }

    pub fn close_all(&self) {
        self.registry.close_all();
    }

    fn toggle(&self, name: &str) -> Result<DispatchOutcome, PopupError> {
        let Some(factory) = self.panels.find(name) else {
            let outcome = DispatchOutcome::Unknown {
                name: name.to_string(),
                available: self.panels.categories().iter().map(|c| c.to_string()).collect(),
            };
            if let Some(message) = outcome.message() {
                error!("{}", message);
                self.diagnostics.record(&message);
            }
            return Ok(outcome);
        };

        let category = Category::from(name);
        let outcome = self
            .registry
            .toggle(&category, || factory.create(&self.app, &category))?;
        info!("Popup '{}': {:?}", category, outcome);

        Ok(match outcome {
            ToggleOutcome::Opened => DispatchOutcome::Opened(category),
            ToggleOutcome::Closed => DispatchOutcome::Closed(category),
            ToggleOutcome::Raised => DispatchOutcome::Raised(category),
        })
    }

    fn fail(&self, message: String) -> DispatchOutcome {
        error!("{}", message);
        self.diagnostics.record(&message);
        DispatchOutcome::Failed(message)
    }
}
