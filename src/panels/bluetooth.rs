use crate::error::PopupError;
use crate::icons;
use crate::panel_manager::{
    AppContext, Category, PopupAction, PopupFactory, PopupInstance, PopupView, PopupWindow, Row,
    build_window,
};
use crate::panels::{self, Popup, PopupBase, failure_text};
use crate::services::bluetooth::{self, BluetoothDevice, ScanEvent};
use crate::services::command::{notify, spawn_detached};
use capy_tasks::{TaskContext, TaskError, TaskHandle};
use log::{debug, info, warn};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

pub struct BluetoothFactory {}

impl BluetoothFactory {
    pub fn new() -> Self {
        Self {}
    }
}

impl PopupFactory for BluetoothFactory {
    fn category(&self) -> &str {
        "bluetooth"
    }

    fn title(&self) -> &str {
        "Bluetooth Manager"
    }

    fn create(&self, app: &AppContext, category: &Category) -> Result<Rc<PopupWindow>, PopupError> {
        info!("Creating bluetooth popup");
        Ok(build_window(app, category, self.title(), |window| {
            BluetoothPopup::new(app, window)
        }))
    }
}

/// Device operations triggered from the lists.
#[derive(Clone, Copy, Debug, PartialEq)]
enum DeviceOp {
    Connect,
    Disconnect,
    Pair,
    Remove,
}

impl DeviceOp {
    fn verb(self) -> &'static str {
        match self {
            DeviceOp::Connect => "Connected to",
            DeviceOp::Disconnect => "Disconnected from",
            DeviceOp::Pair => "Paired with",
            DeviceOp::Remove => "Removed",
        }
    }
}

struct BluetoothPopup {
    base: PopupBase,
    this: Weak<BluetoothPopup>,
    powered: Cell<bool>,
    paired: RefCell<Vec<BluetoothDevice>>,
    available: RefCell<Vec<BluetoothDevice>>,
    scan: RefCell<Option<TaskHandle>>,
}

impl BluetoothPopup {
    fn new(app: &AppContext, window: Weak<PopupWindow>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            base: PopupBase::new(app, window),
            this: this.clone(),
            powered: Cell::new(false),
            paired: RefCell::new(Vec::new()),
            available: RefCell::new(Vec::new()),
            scan: RefCell::new(None),
        })
    }

    fn load(&self) {
        let timeout = self.base.timeout();
        panels::spawn(
            &self.this,
            "bluetooth_read",
            move |ctx| -> Result<(bool, Vec<BluetoothDevice>), PopupError> {
                let powered = bluetooth::is_powered(timeout)?;
                let paired = if powered {
                    bluetooth::paired_devices(ctx.token(), timeout)?
                } else {
                    Vec::new()
                };
                Ok((powered, paired))
            },
            |popup: &BluetoothPopup, result| match result {
                Ok((powered, paired)) => popup.apply_devices(powered, paired),
                Err(e) => popup.report("Could not read Bluetooth state", e),
            },
        );
    }

    fn apply_devices(&self, powered: bool, paired: Vec<BluetoothDevice>) {
        debug!("Bluetooth powered={} paired={}", powered, paired.len());
        self.powered.set(powered);
        self.available
            .borrow_mut()
            .retain(|d| !paired.iter().any(|p| p.mac == d.mac));
        *self.paired.borrow_mut() = paired;
    }

    fn set_power(&self, on: bool) {
        self.powered.set(on);
        if !on {
            self.stop_scan();
            self.paired.borrow_mut().clear();
            self.available.borrow_mut().clear();
        }
        let timeout = self.base.timeout();
        panels::spawn(
            &self.this,
            "bluetooth_power",
            move |_ctx| bluetooth::set_power(on, timeout),
            |popup: &BluetoothPopup, result| match result {
                Ok(()) => popup.load(),
                Err(e) => popup.report("Bluetooth power failed", e),
            },
        );
    }

    fn is_scanning(&self) -> bool {
        self.scan
            .borrow()
            .as_ref()
            .is_some_and(|h| self.base.runner().is_active(h.id()))
    }

    fn start_scan(&self) {
        if !self.powered.get() {
            self.base.set_status("Bluetooth is off");
            return;
        }
        if self.is_scanning() {
            return;
        }
        self.available.borrow_mut().clear();
        let duration = Duration::from_secs(self.base.config().bluetooth_scan_secs);

        let handle = panels::spawn_with_progress(
            &self.this,
            "bluetooth_scan",
            None,
            move |ctx: &TaskContext<ScanEvent>| {
                bluetooth::scan(duration, ctx.token(), |event| {
                    ctx.progress(event);
                })
            },
            |popup: &BluetoothPopup, event| popup.apply_scan_event(event),
            |popup: &BluetoothPopup, result| popup.finish_scan(result),
        );
        *self.scan.borrow_mut() = handle;
    }

    fn stop_scan(&self) {
        if let Some(handle) = self.scan.borrow().as_ref() {
            debug!("Stopping Bluetooth scan {}", handle.id());
            self.base.cancel(handle);
        }
    }

    fn apply_scan_event(&self, event: ScanEvent) {
        match event {
            ScanEvent::Status(text) => self.base.set_status(text),
            ScanEvent::DeviceFound(device) => {
                let known = self.paired.borrow().iter().any(|d| d.mac == device.mac)
                    || self.available.borrow().iter().any(|d| d.mac == device.mac);
                if !known {
                    self.available.borrow_mut().push(device);
                }
            }
        }
    }

    fn finish_scan(&self, result: Result<Vec<BluetoothDevice>, TaskError>) {
        self.scan.borrow_mut().take();
        match result {
            Ok(found) => {
                let paired = self.paired.borrow();
                let mut available = self.available.borrow_mut();
                for device in found {
                    let known = paired.iter().any(|d| d.mac == device.mac)
                        || available.iter().any(|d| d.mac == device.mac);
                    if !known {
                        available.push(device);
                    }
                }
                self.base
                    .set_status(format!("Scan complete! Found {} devices", available.len()));
            }
            Err(TaskError::Cancelled) => self.base.set_status("Scan stopped"),
            Err(e) => self.report("Scan failed", e),
        }
    }

    fn run_device_op(&self, op: DeviceOp, device: BluetoothDevice) {
        let timeout = self.base.timeout();
        self.base.set_status(format!("{}...", op_progress(op, &device.name)));

        panels::spawn(
            &self.this,
            "bluetooth_device",
            move |ctx| -> Result<String, PopupError> {
                let mac = device.mac.as_str();
                match op {
                    DeviceOp::Connect => bluetooth::connect(mac)?,
                    DeviceOp::Disconnect => bluetooth::disconnect(mac, timeout)?,
                    DeviceOp::Pair => {
                        bluetooth::pair(mac, ctx.token(), timeout)?;
                        if let Err(e) = bluetooth::connect(mac) {
                            warn!("Paired {} but could not connect: {}", mac, e);
                        }
                    }
                    DeviceOp::Remove => bluetooth::remove(mac, timeout)?,
                }
                let text = format!("{} {}", op.verb(), device.name);
                notify("Bluetooth", &text);
                Ok(text)
            },
            |popup: &BluetoothPopup, result| match result {
                Ok(text) => {
                    popup.base.set_status(text);
                    popup.load();
                }
                Err(e) => {
                    popup.report("Bluetooth operation failed", e);
                }
            },
        );
    }

    fn find_device(&self, list: &str, mac: &str) -> Option<BluetoothDevice> {
        let devices = match list {
            "paired" => self.paired.borrow(),
            _ => self.available.borrow(),
        };
        devices.iter().find(|d| d.mac == mac).cloned()
    }

    fn report(&self, context: &str, err: TaskError) {
        if let Some(text) = failure_text(context, &err) {
            warn!("{}", text);
            self.base.set_status(text);
        }
    }

    fn open_settings(&self) {
        if let Err(e) = spawn_detached("blueman-manager", &[]) {
            self.base.set_status(format!("Could not open Bluetooth settings: {}", e));
        }
    }
}

fn op_progress(op: DeviceOp, name: &str) -> String {
    match op {
        DeviceOp::Connect => format!("Connecting to {}", name),
        DeviceOp::Disconnect => format!("Disconnecting from {}", name),
        DeviceOp::Pair => format!("Pairing with {}", name),
        DeviceOp::Remove => format!("Removing {}", name),
    }
}

impl PopupInstance for BluetoothPopup {
    fn on_show(&self) {
        self.load();
    }

    fn on_hide(&self) {
        self.base.cancel_all();
    }

    fn render(&self) -> PopupView {
        let powered = self.powered.get();
        let scanning = self.is_scanning();
        let paired = self.paired.borrow();
        let available = self.available.borrow();

        let subtitle = if !powered {
            "Off".to_string()
        } else {
            let connected = paired.iter().filter(|d| d.connected).count();
            format!("{} connected", connected)
        };

        let mut view = PopupView::new("Bluetooth", subtitle).row(Row::toggle(
            "power",
            icons::BLUETOOTH,
            "Bluetooth",
            if powered { "On" } else { "Off" },
            powered,
        ));

        if powered {
            view = view
                .row(Row::Separator)
                .rows(paired.iter().map(|d| {
                    Row::item(
                        "paired",
                        d.mac.clone(),
                        icons::bluetooth_device(d.connected, true),
                        d.name.clone(),
                        if d.connected { "Connected" } else { "Paired" },
                    )
                }))
                .row(Row::Separator)
                .rows(available.iter().map(|d| {
                    Row::item(
                        "available",
                        d.mac.clone(),
                        icons::bluetooth_device(false, false),
                        d.name.clone(),
                        d.mac.clone(),
                    )
                }));
        }

        let scan_label = if scanning { "Stop Scan" } else { "Scan" };
        view = view.row(Row::buttons(&[("scan", scan_label), ("settings", "Settings")]));
        self.base.finish(view)
    }

    fn handle_action(&self, action: PopupAction) {
        match action {
            PopupAction::Toggle { id, active } if id == "power" => self.set_power(active),
            PopupAction::Button { id } if id == "scan" => {
                if self.is_scanning() {
                    self.stop_scan();
                } else {
                    self.start_scan();
                }
            }
            PopupAction::Button { id } if id == "settings" => self.open_settings(),
            PopupAction::Item { id, key, secondary } => match self.find_device(&id, &key) {
                Some(device) => {
                    let op = match (id.as_str(), secondary, device.connected) {
                        ("paired", true, _) => DeviceOp::Remove,
                        ("paired", false, true) => DeviceOp::Disconnect,
                        ("paired", false, false) => DeviceOp::Connect,
                        _ => DeviceOp::Pair,
                    };
                    self.run_device_op(op, device);
                }
                None => debug!("Unknown Bluetooth device {} in {}", key, id),
            },
            other => debug!("Bluetooth popup ignores {:?}", other),
        }
        self.base.refresh();
    }
}

impl Popup for BluetoothPopup {
    fn base(&self) -> &PopupBase {
        &self.base
    }
}
