//! Popup implementations.
//!
//! - `brightness` - laptop/external brightness, theme toggle
//! - `volume` - default sink volume and mute
//! - `battery` - charge limit
//! - `system_info` - CPU, memory, disk, uptime
//! - `bluetooth` - power, paired devices, discovery
//! - `network` - radios, wifi networks
//! - `showcase` - demo of the background task machinery
//!
//! Popups never block the loop: anything that touches the system runs through
//! [`spawn`] / [`spawn_with_progress`], and results are only applied while the
//! popup's window is still alive.

pub mod battery;
pub mod bluetooth;
pub mod brightness;
pub mod network;
pub mod showcase;
pub mod system_info;
pub mod volume;

use crate::config::DaemonConfig;
use crate::panel_manager::{AppContext, PanelManager, PopupInstance, PopupView, PopupWindow};
use capy_tasks::{BoxError, TaskContext, TaskError, TaskHandle, TaskRunner};
use log::debug;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

/// Register every popup factory.
pub fn register_all(panels: &mut PanelManager) {
    panels.register_factory(brightness::BrightnessFactory::new());
    panels.register_factory(volume::VolumeFactory::new());
    panels.register_factory(battery::BatteryFactory::new());
    panels.register_factory(system_info::SystemInfoFactory::new());
    panels.register_factory(bluetooth::BluetoothFactory::new());
    panels.register_factory(network::NetworkFactory::new());
    panels.register_factory(showcase::ShowcaseFactory::new());
}

/// Implemented by every popup so the task helpers can reach its shared state.
pub trait Popup: PopupInstance + 'static {
    fn base(&self) -> &PopupBase;
}

/// State every popup carries: its window, the app handle, tracked tasks and
/// the inline status line.
pub struct PopupBase {
    window: Weak<PopupWindow>,
    app: AppContext,
    tasks: RefCell<Vec<TaskHandle>>,
    status: RefCell<Option<String>>,
}

impl PopupBase {
    pub fn new(app: &AppContext, window: Weak<PopupWindow>) -> Self {
        Self {
            window,
            app: app.clone(),
            tasks: RefCell::new(Vec::new()),
            status: RefCell::new(None),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.app.config
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.app.runner
    }

    /// Default timeout for wrapped commands.
    pub fn timeout(&self) -> Duration {
        self.app.config.command_timeout()
    }

    /// Window still exists and has not been destroyed.
    pub fn is_live(&self) -> bool {
        self.window.upgrade().is_some_and(|w| !w.is_destroyed())
    }

    /// Re-render to the surface.
    pub fn refresh(&self) {
        if let Some(window) = self.window.upgrade() {
            window.render();
        }
    }

    pub fn close_window(&self) {
        if let Some(window) = self.window.upgrade() {
            window.close();
        }
    }

    pub fn set_status(&self, status: impl Into<String>) {
        *self.status.borrow_mut() = Some(status.into());
    }

    pub fn clear_status(&self) {
        *self.status.borrow_mut() = None;
    }

    pub fn status(&self) -> Option<String> {
        self.status.borrow().clone()
    }

    /// Some tracked task has not delivered its result yet.
    pub fn is_busy(&self) -> bool {
        let runner = self.runner();
        self.tasks.borrow().iter().any(|h| runner.is_active(h.id()))
    }

    pub fn cancel(&self, handle: &TaskHandle) {
        self.runner().cancel(handle);
    }

    /// Cancel every in-flight task of this popup.
    pub fn cancel_all(&self) {
        let tasks = std::mem::take(&mut *self.tasks.borrow_mut());
        for handle in tasks {
            self.runner().cancel(&handle);
        }
    }

    /// Attach the status line and busy flag to a rendered view.
    pub fn finish(&self, mut view: PopupView) -> PopupView {
        view.status = self.status();
        view.busy = self.is_busy();
        view
    }

    fn track(&self, handle: TaskHandle) {
        let runner = self.runner();
        let mut tasks = self.tasks.borrow_mut();
        tasks.retain(|h| runner.is_active(h.id()));
        tasks.push(handle);
    }
}

/// Run `work` in the background; `done` runs on the loop with its result,
/// unless the popup has been closed in the meantime.
pub fn spawn<P, T, E, W, D>(popup: &Weak<P>, name: &str, work: W, done: D) -> Option<TaskHandle>
where
    P: Popup,
    T: Send + 'static,
    E: Into<BoxError>,
    W: FnOnce(&TaskContext<()>) -> Result<T, E> + Send + 'static,
    D: FnOnce(&P, Result<T, TaskError>) + 'static,
{
    let strong = popup.upgrade()?;
    let done = Rc::new(Cell::new(Some(done)));
    let done_err = Rc::clone(&done);
    let target = popup.clone();
    let target_err = popup.clone();

    let handle = strong.base().runner().build(work).name(name).spawn(
        move |value| deliver(&target, &done, Ok(value)),
        move |err| deliver(&target_err, &done_err, Err(err)),
    );
    track_and_refresh(&*strong, &handle);
    Some(handle)
}

/// Like [`spawn`], with a progress stream delivered to `on_progress`.
pub fn spawn_with_progress<P, Ev, T, E, W, G, D>(
    popup: &Weak<P>,
    name: &str,
    throttle: Option<Duration>,
    work: W,
    mut on_progress: G,
    done: D,
) -> Option<TaskHandle>
where
    P: Popup,
    Ev: Send + 'static,
    T: Send + 'static,
    E: Into<BoxError>,
    W: FnOnce(&TaskContext<Ev>) -> Result<T, E> + Send + 'static,
    G: FnMut(&P, Ev) + 'static,
    D: FnOnce(&P, Result<T, TaskError>) + 'static,
{
    let strong = popup.upgrade()?;
    let done = Rc::new(Cell::new(Some(done)));
    let done_err = Rc::clone(&done);
    let target = popup.clone();
    let target_err = popup.clone();
    let target_progress = popup.clone();

    let mut builder = strong
        .base()
        .runner()
        .build(work)
        .name(name)
        .on_progress(move |event| {
            let Some(popup) = live(&target_progress) else {
                return;
            };
            on_progress(&popup, event);
            popup.base().refresh();
        });
    if let Some(interval) = throttle {
        builder = builder.throttle(interval);
    }
    let handle = builder.spawn(
        move |value| deliver(&target, &done, Ok(value)),
        move |err| deliver(&target_err, &done_err, Err(err)),
    );
    track_and_refresh(&*strong, &handle);
    Some(handle)
}

fn track_and_refresh<P: Popup>(popup: &P, handle: &TaskHandle) {
    popup.base().track(handle.clone());
    popup.base().refresh();
}

fn live<P: Popup>(popup: &Weak<P>) -> Option<Rc<P>> {
    let popup = popup.upgrade()?;
    if popup.base().is_live() {
        Some(popup)
    } else {
        None
    }
}

fn deliver<P, T, D>(popup: &Weak<P>, done: &Cell<Option<D>>, result: Result<T, TaskError>)
where
    P: Popup,
    D: FnOnce(&P, Result<T, TaskError>),
{
    let Some(popup) = live(popup) else {
        debug!("Dropping task result for a closed popup");
        return;
    };
    if let Some(done) = done.take() {
        done(&popup, result);
    }
    popup.base().refresh();
}

/// Orders writes to one system control.
///
/// At most one write is in flight; values requested meanwhile replace each
/// other and only the latest is written once the running write completes.
pub struct SerialWrite<T> {
    in_flight: Cell<bool>,
    pending: RefCell<Option<T>>,
    touched: Cell<bool>,
}

impl<T: PartialEq> SerialWrite<T> {
    pub fn new() -> Self {
        Self {
            in_flight: Cell::new(false),
            pending: RefCell::new(None),
            touched: Cell::new(false),
        }
    }

    /// Value to write now, or `None` when it waits behind the running write.
    pub fn request(&self, value: T) -> Option<T> {
        self.touched.set(true);
        if self.in_flight.replace(true) {
            *self.pending.borrow_mut() = Some(value);
            None
        } else {
            Some(value)
        }
    }

    /// The running write for `written` finished; returns the next value to write.
    pub fn complete(&self, written: &T) -> Option<T> {
        match self.pending.borrow_mut().take() {
            Some(next) if next != *written => Some(next),
            _ => {
                self.in_flight.set(false);
                None
            }
        }
    }

    /// The user changed the control; initial readings must not overwrite it.
    pub fn touched(&self) -> bool {
        self.touched.get()
    }
}

/// Message for a failed task, or `None` when it was cancelled.
pub fn failure_text(context: &str, err: &TaskError) -> Option<String> {
    if err.is_cancelled() {
        None
    } else {
        Some(format!("{}: {}", context, err))
    }
}

/// Shell-script stand-ins for the wrapped OS utilities, found first on `PATH`.
#[cfg(test)]
pub(crate) mod fake_tools {
    use std::env;
    use std::ffi::OsString;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::sync::{Mutex, MutexGuard};

    static PATH_LOCK: Mutex<()> = Mutex::new(());

    pub(crate) struct FakeTools {
        dir: tempfile::TempDir,
        old_path: Option<OsString>,
        _guard: MutexGuard<'static, ()>,
    }

    impl FakeTools {
        pub(crate) fn new() -> Self {
            let guard = PATH_LOCK.lock().unwrap_or_else(|e| e.into_inner());
            let dir = tempfile::tempdir().unwrap();
            let old_path = env::var_os("PATH");
            let mut paths = vec![dir.path().to_path_buf()];
            if let Some(old) = &old_path {
                paths.extend(env::split_paths(old));
            }
            unsafe {
                env::set_var("PATH", env::join_paths(paths).unwrap());
            }
            Self {
                dir,
                old_path,
                _guard: guard,
            }
        }

        /// File every fake tool appends its arguments to.
        pub(crate) fn log(&self) -> PathBuf {
            self.dir.path().join("calls.log")
        }

        /// Install `name`; `body` runs after the call is logged, with `$*` set.
        pub(crate) fn install(&self, name: &str, body: &str) {
            let path = self.dir.path().join(name);
            let script = format!(
                "#!/bin/sh\necho \"{} $*\" >> '{}'\n{}\n",
                name,
                self.log().display(),
                body
            );
            fs::write(&path, script).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            fs::read_to_string(self.log())
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    impl Drop for FakeTools {
        fn drop(&mut self) {
            unsafe {
                match &self.old_path {
                    Some(old) => env::set_var("PATH", old),
                    None => env::remove_var("PATH"),
                }
            }
        }
    }
}
