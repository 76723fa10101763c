//! Daemon lifecycle: the single-threaded event loop and graceful shutdown.
//!
//! The loop owns every popup, the window registry and all task callbacks.
//! Everything else (IPC handlers, signal listener, task workers) talks to it
//! through crossbeam channels only.

use crate::config::DaemonConfig;
use crate::dispatcher::CommandDispatcher;
use crate::error::PopupError;
use crate::ipc::{self, PendingRequest, Response};
use crate::panel_manager::{AppContext, PanelManager, Surface, SurfaceEvent, WindowRegistry};
use capy_tasks::TaskRunner;
use crossbeam_channel::{Receiver, never, select, unbounded};
use log::{debug, error, info, warn};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;
use std::thread;

/// Keeps the loop alive while no popup is open.
#[derive(Clone, Default)]
pub struct Hold {
    count: Rc<Cell<usize>>,
}

impl Hold {
    pub fn acquire(&self) -> HoldGuard {
        self.count.set(self.count.get() + 1);
        HoldGuard {
            count: Rc::clone(&self.count),
        }
    }

    pub fn is_held(&self) -> bool {
        self.count.get() > 0
    }
}

/// Released on drop.
pub struct HoldGuard {
    count: Rc<Cell<usize>>,
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        self.count.set(self.count.get().saturating_sub(1));
    }
}

/// Forward termination signals to the loop.
pub fn start_signal_listener() -> Result<Receiver<i32>, PopupError> {
    let mut signals = Signals::new([SIGTERM, SIGINT, SIGHUP])?;
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            for signal in signals.forever() {
                if tx.send(signal).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

pub struct Daemon {
    runner: Rc<TaskRunner>,
    dispatcher: CommandDispatcher,
    actions: Receiver<SurfaceEvent>,
    hold: Hold,
    startup_hold: RefCell<Option<HoldGuard>>,
    socket_path: PathBuf,
}

impl Daemon {
    pub fn new(config: DaemonConfig, surface: Rc<dyn Surface>, panels: PanelManager) -> Self {
        let runner = Rc::new(TaskRunner::new());
        let (actions_tx, actions) = unbounded();
        let socket_path = config.socket_path.clone();
        let app = AppContext {
            runner: Rc::clone(&runner),
            surface,
            config: Rc::new(config),
            actions: actions_tx,
        };
        let dispatcher = CommandDispatcher::new(app, panels, WindowRegistry::new());
        let hold = Hold::default();
        let startup_hold = RefCell::new(Some(hold.acquire()));

        Self {
            runner,
            dispatcher,
            actions,
            hold,
            startup_hold,
            socket_path,
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn hold(&self) -> &Hold {
        &self.hold
    }

    /// Drop the hold taken at startup; the loop then ends with the last popup.
    pub fn release_startup_hold(&self) {
        if self.startup_hold.borrow_mut().take().is_some() {
            debug!("Startup hold released");
        }
    }

    pub fn should_exit(&self) -> bool {
        !self.hold.is_held() && self.dispatcher.registry().is_empty()
    }

    fn handle_request(&self, request: PendingRequest) {
        let outcome = self.dispatcher.dispatch_outcome(&request.argv);
        request.respond(Response {
            exit_code: 0,
            message: outcome.message(),
        });
    }

    /// Run until shutdown, or until nothing holds the daemon and no popup is open.
    pub fn run_loop(&self, requests: Receiver<PendingRequest>, signals: Receiver<i32>) {
        let mut requests = requests;
        let mut signals = signals;
        info!("Event loop running");

        loop {
            if self.should_exit() {
                info!("No popups open, leaving the event loop");
                break;
            }

            let mut requests_closed = false;
            let mut signals_closed = false;
            let mut stop = false;

            select! {
                recv(self.runner.receiver()) -> delivery => match delivery {
                    Ok(delivery) => self.runner.deliver(delivery),
                    Err(_) => error!("Task delivery channel closed"),
                },
                recv(requests) -> request => match request {
                    Ok(request) => self.handle_request(request),
                    Err(_) => requests_closed = true,
                },
                recv(signals) -> signal => match signal {
                    Ok(signal) => {
                        info!("Received signal {}", signal);
                        stop = true;
                    }
                    Err(_) => signals_closed = true,
                },
                recv(self.actions) -> event => match event {
                    Ok(event) => self.dispatcher.handle_action(event),
                    Err(_) => error!("Surface action channel closed"),
                },
            }

            if stop {
                self.shutdown();
                break;
            }
            if requests_closed {
                warn!("IPC listener stopped, no more forwarded requests");
                requests = never();
            }
            if signals_closed {
                warn!("Signal listener stopped");
                signals = never();
            }
        }
    }

    /// Graceful shutdown: stop deliveries, close popups (cancelling their
    /// tasks), release the hold and remove the socket. Workers are abandoned.
    pub fn shutdown(&self) {
        info!("Received shutdown signal. Exiting gracefully");
        self.runner.shutdown();
        self.dispatcher.close_all();
        self.release_startup_hold();
        ipc::remove_socket(&self.socket_path);
    }
}

/// Become the daemon: bind the socket, dispatch our own argv, run the loop.
pub fn run(config: DaemonConfig, argv: &[String]) -> Result<(), PopupError> {
    let listener = ipc::bind(&config.socket_path)?;
    let (requests_tx, requests) = unbounded();
    ipc::start_listener(listener, requests_tx, config.request_timeout())?;
    let signals = start_signal_listener()?;

    let mut panels = PanelManager::new();
    crate::panels::register_all(&mut panels);

    let daemon = Daemon::new(
        config,
        Rc::new(crate::panel_manager::LogSurface),
        panels,
    );
    let outcome = daemon.dispatcher().dispatch_outcome(argv);
    if let Some(message) = outcome.message() {
        eprintln!("{}", message);
    }

    daemon.run_loop(requests, signals);
    ipc::remove_socket(&daemon.socket_path);
    info!("Daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel_manager::{
        Category, LogSurface, PopupAction, PopupFactory, PopupInstance, PopupView, PopupWindow,
        build_window,
    };

    struct Blank;

    impl PopupInstance for Blank {
        fn render(&self) -> PopupView {
            PopupView::new("Blank", "")
        }
    }

    struct BlankFactory;

    impl PopupFactory for BlankFactory {
        fn category(&self) -> &str {
            "blank"
        }

        fn title(&self) -> &str {
            "Blank"
        }

        fn create(&self, app: &AppContext, category: &Category) -> Result<Rc<PopupWindow>, PopupError> {
            Ok(build_window(app, category, self.title(), |_| Rc::new(Blank)))
        }
    }

    fn daemon(dir: &tempfile::TempDir) -> Daemon {
        let config = DaemonConfig {
            socket_path: dir.path().join("popups.sock"),
            diagnostic_log: dir.path().join("diag.log"),
            ..DaemonConfig::default()
        };
        let mut panels = PanelManager::new();
        panels.register_factory(BlankFactory);
        Daemon::new(config, Rc::new(LogSurface), panels)
    }

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_hold_counting() {
        let hold = Hold::default();
        let first = hold.acquire();
        let second = hold.acquire();
        drop(first);
        assert!(hold.is_held());
        drop(second);
        assert!(!hold.is_held());
    }

    #[test]
    fn test_startup_hold_keeps_daemon_alive() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = daemon(&dir);
        assert!(!daemon.should_exit());
        daemon.release_startup_hold();
        assert!(daemon.should_exit());
    }

    #[test]
    fn test_loop_exits_when_last_popup_closes() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = daemon(&dir);
        daemon.dispatcher().dispatch(&argv(&["CapyPopups", "blank"]));
        daemon.release_startup_hold();

        // the surface reports a close; the loop handles it and then has nothing left
        daemon
            .dispatcher()
            .app()
            .actions
            .send(SurfaceEvent {
                category: Category::from("blank"),
                action: PopupAction::Close,
            })
            .unwrap();

        let (_requests_tx, requests) = unbounded();
        let (_signals_tx, signals) = unbounded();
        daemon.run_loop(requests, signals);
        assert!(daemon.dispatcher().registry().is_empty());
    }

    #[test]
    fn test_forwarded_request_gets_reply() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = daemon(&dir);

        let (pending, reply) = PendingRequest::new(argv(&["CapyPopups", "nope"]));
        daemon.handle_request(pending);
        let response = reply.try_recv().unwrap();
        assert_eq!(response.exit_code, 0);
        assert_eq!(
            response.message.as_deref(),
            Some("Unknown popup 'nope'. Available: blank")
        );

        let (pending, reply) = PendingRequest::new(argv(&["CapyPopups", "blank"]));
        daemon.handle_request(pending);
        assert_eq!(reply.try_recv().unwrap(), Response::default());
        assert!(daemon.dispatcher().registry().contains(&Category::from("blank")));
    }

    #[test]
    fn test_signal_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = daemon(&dir);
        daemon.dispatcher().dispatch(&argv(&["CapyPopups", "blank"]));
        let window = daemon
            .dispatcher()
            .registry()
            .get(&Category::from("blank"))
            .unwrap();

        let (_requests_tx, requests) = unbounded();
        let (signals_tx, signals) = unbounded();
        signals_tx.send(SIGTERM).unwrap();
        daemon.run_loop(requests, signals);

        assert!(window.is_destroyed());
        assert!(daemon.dispatcher().registry().is_empty());
        assert!(!daemon.hold().is_held());
        assert!(daemon.runner.is_exiting());
    }

    #[test]
    fn test_shutdown_removes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = daemon(&dir);
        let _listener = ipc::bind(&dir.path().join("popups.sock")).unwrap();
        daemon.shutdown();
        assert!(!dir.path().join("popups.sock").exists());
    }
}
