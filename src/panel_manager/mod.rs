use crate::config::DaemonConfig;
use capy_tasks::TaskRunner;
use crossbeam_channel::Sender;
use std::fmt;
use std::rc::Rc;

pub mod factory;
pub mod registry;
pub mod view;
pub mod window;

pub use factory::{PopupFactory, build_window};
pub use registry::{ToggleOutcome, WindowRegistry};
pub use view::{LogSurface, PopupAction, PopupView, Row, Surface, SurfaceEvent};
pub use window::PopupWindow;

/// Popup kind, as given on the command line (`volume`, `bluetooth`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Category(String);

impl Category {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Category {
    fn from(name: &str) -> Self {
        Category(name.to_string())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content of a popup window.
pub trait PopupInstance {
    /// Window became visible.
    fn on_show(&self) {}
    /// Window got hidden or destroyed; in-flight work should be cancelled.
    fn on_hide(&self) {}
    fn render(&self) -> PopupView;
    fn handle_action(&self, _action: PopupAction) {}
}

/// Application handle passed to popup factories.
#[derive(Clone)]
pub struct AppContext {
    pub runner: Rc<TaskRunner>,
    pub surface: Rc<dyn Surface>,
    pub config: Rc<DaemonConfig>,
    /// Surfaces report user interactions through this channel.
    pub actions: Sender<SurfaceEvent>,
}

/// Catalogue of popup factories.
#[derive(Default)]
pub struct PanelManager {
    factories: Vec<Box<dyn PopupFactory>>,
}

impl PanelManager {
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    pub fn register_factory<F: PopupFactory + 'static>(&mut self, factory: F) {
        self.factories.push(Box::new(factory));
    }

    pub fn find(&self, category: &str) -> Option<&dyn PopupFactory> {
        self.factories
            .iter()
            .find(|f| f.category() == category)
            .map(|f| f.as_ref())
    }

    /// Registered categories, in registration order.
    pub fn categories(&self) -> Vec<&str> {
        self.factories.iter().map(|f| f.category()).collect()
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> AppContext {
    let (actions, _) = crossbeam_channel::unbounded();
    AppContext {
        runner: Rc::new(TaskRunner::new()),
        surface: Rc::new(LogSurface),
        config: Rc::new(DaemonConfig::default()),
        actions,
    }
}
