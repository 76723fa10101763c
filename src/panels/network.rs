use crate::error::PopupError;
use crate::icons;
use crate::panel_manager::{
    AppContext, Category, PopupAction, PopupFactory, PopupInstance, PopupView, PopupWindow, Row,
    build_window,
};
use crate::panels::{self, Popup, PopupBase, failure_text};
use crate::services::network::{self, NetworkStatus, WifiNetwork};
use capy_tasks::{TaskError, TaskHandle};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub struct NetworkFactory {}

impl NetworkFactory {
    pub fn new() -> Self {
        Self {}
    }
}

impl PopupFactory for NetworkFactory {
    fn category(&self) -> &str {
        "network"
    }

    fn title(&self) -> &str {
        "Network Manager"
    }

    fn create(&self, app: &AppContext, category: &Category) -> Result<Rc<PopupWindow>, PopupError> {
        info!("Creating network popup");
        Ok(build_window(app, category, self.title(), |window| {
            NetworkPopup::new(app, window)
        }))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum NetworkOp {
    Connect,
    Disconnect,
    Forget,
}

struct NetworkPopup {
    base: PopupBase,
    this: Weak<NetworkPopup>,
    status: RefCell<Option<NetworkStatus>>,
    networks: RefCell<Vec<WifiNetwork>>,
    scan: RefCell<Option<TaskHandle>>,
}

impl NetworkPopup {
    fn new(app: &AppContext, window: Weak<PopupWindow>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            base: PopupBase::new(app, window),
            this: this.clone(),
            status: RefCell::new(None),
            networks: RefCell::new(Vec::new()),
            scan: RefCell::new(None),
        })
    }

    fn load_status(&self) {
        let timeout = self.base.timeout();
        panels::spawn(
            &self.this,
            "network_status",
            move |_ctx| network::get_status(timeout),
            |popup: &NetworkPopup, result| match result {
                Ok(status) => popup.apply_status(status),
                Err(e) => popup.report("Could not read network state", e),
            },
        );
    }

    fn apply_status(&self, status: NetworkStatus) {
        debug!("Network status: {:?}", status);
        if !status.radio.wifi_enabled {
            self.networks.borrow_mut().clear();
        }
        *self.status.borrow_mut() = Some(status);
    }

    fn wifi_enabled(&self) -> bool {
        self.status
            .borrow()
            .as_ref()
            .is_some_and(|s| s.radio.wifi_enabled)
    }

    fn is_scanning(&self) -> bool {
        self.scan
            .borrow()
            .as_ref()
            .is_some_and(|h| self.base.runner().is_active(h.id()))
    }

    fn start_scan(&self) {
        if self.is_scanning() {
            return;
        }
        let timeout = self.base.timeout();
        self.base.set_status("Scanning...");
        let handle = panels::spawn(
            &self.this,
            "wifi_scan",
            move |ctx| network::scan(ctx.token(), timeout),
            |popup: &NetworkPopup, result| popup.finish_scan(result),
        );
        *self.scan.borrow_mut() = handle;
    }

    fn finish_scan(&self, result: Result<Vec<WifiNetwork>, TaskError>) {
        self.scan.borrow_mut().take();
        match result {
            Ok(networks) => {
                self.base
                    .set_status(format!("Found {} networks", networks.len()));
                *self.networks.borrow_mut() = networks;
            }
            Err(TaskError::Cancelled) => self.base.clear_status(),
            Err(e) => self.report("Scan failed", e),
        }
    }

    fn set_radio(&self, airplane: bool, enabled: bool) {
        let timeout = self.base.timeout();
        if let Some(handle) = self.scan.borrow().as_ref() {
            self.base.cancel(handle);
        }
        panels::spawn(
            &self.this,
            "network_radio",
            move |_ctx| {
                if airplane {
                    network::set_airplane_mode(enabled, timeout)
                } else {
                    network::set_wifi(enabled, timeout)
                }
            },
            |popup: &NetworkPopup, result| match result {
                Ok(()) => {
                    popup.base.clear_status();
                    popup.load_status();
                }
                Err(e) => popup.report("Radio change failed", e),
            },
        );
    }

    fn run_op(&self, op: NetworkOp, ssid: String) {
        let timeout = self.base.timeout();
        self.base.set_status(match op {
            NetworkOp::Connect => format!("Connecting to {}...", ssid),
            NetworkOp::Disconnect => format!("Disconnecting from {}...", ssid),
            NetworkOp::Forget => format!("Forgetting {}...", ssid),
        });

        panels::spawn(
            &self.this,
            "network_op",
            move |ctx| -> Result<String, PopupError> {
                match op {
                    NetworkOp::Connect => {
                        network::connect(&ssid, ctx.token())?;
                        Ok(format!("Connected to {}", ssid))
                    }
                    NetworkOp::Disconnect => {
                        network::disconnect(&ssid, timeout)?;
                        Ok(format!("Disconnected from {}", ssid))
                    }
                    NetworkOp::Forget => {
                        network::forget(&ssid, timeout)?;
                        Ok(format!("Forgot {}", ssid))
                    }
                }
            },
            |popup: &NetworkPopup, result| match result {
                Ok(text) => {
                    popup.base.set_status(text);
                    popup.load_status();
                    popup.start_scan();
                }
                Err(e) => popup.report("Network operation failed", e),
            },
        );
    }

    /// Operation for a click on a network row.
    fn op_for(&self, ssid: &str, secondary: bool) -> Option<NetworkOp> {
        let networks = self.networks.borrow();
        let network = networks.iter().find(|n| n.ssid == ssid)?;
        match (secondary, network.connected, network.known) {
            (true, _, true) => Some(NetworkOp::Forget),
            (true, _, false) => None,
            (false, true, _) => Some(NetworkOp::Disconnect),
            (false, false, _) => Some(NetworkOp::Connect),
        }
    }

    fn active_ssid(&self) -> Option<String> {
        self.status
            .borrow()
            .as_ref()
            .and_then(|s| s.active.as_ref())
            .map(|a| a.ssid.clone())
    }

    fn report(&self, context: &str, err: TaskError) {
        if let Some(text) = failure_text(context, &err) {
            warn!("{}", text);
            self.base.set_status(text);
        }
    }
}

impl PopupInstance for NetworkPopup {
    fn on_show(&self) {
        self.load_status();
        self.start_scan();
    }

    fn on_hide(&self) {
        self.base.cancel_all();
    }

    fn render(&self) -> PopupView {
        let status = self.status.borrow();
        let Some(status) = status.as_ref() else {
            return self.base.finish(PopupView::new("Network", "Loading..."));
        };

        let active_row = match &status.active {
            Some(active) => Row::info(
                icons::WIFI,
                active.ssid.clone(),
                format!("{} {}%", icons::signal_bars(active.signal), active.signal),
            ),
            None => Row::info(icons::WIFI, "Not connected", ""),
        };

        let mut view = PopupView::new("Network", if status.radio.airplane_mode { "Airplane mode" } else { "" })
            .row(Row::toggle(
                "wifi",
                icons::WIFI,
                "Wi-Fi",
                if status.radio.wifi_enabled { "On" } else { "Off" },
                status.radio.wifi_enabled,
            ))
            .row(Row::toggle(
                "airplane",
                icons::AIRPLANE,
                "Airplane Mode",
                "",
                status.radio.airplane_mode,
            ))
            .row(active_row);

        if status.radio.wifi_enabled {
            view = view
                .row(Row::Separator)
                .rows(self.networks.borrow().iter().map(|n| {
                    let mut subtitle = format!("{} {}%", icons::signal_bars(n.signal), n.signal);
                    if n.connected {
                        subtitle.push_str(" - Connected");
                    } else if n.known {
                        subtitle.push_str(" - Saved");
                    }
                    Row::item(
                        "network",
                        n.ssid.clone(),
                        icons::wifi_network(n.connected, n.known, n.is_secured()),
                        n.ssid.clone(),
                        subtitle,
                    )
                }));
        }

        let scan_label = if self.is_scanning() { "Scanning..." } else { "Scan" };
        view = view.row(Row::buttons(&[
            ("scan", scan_label),
            ("disconnect", "Disconnect"),
            ("settings", "Settings"),
        ]));
        self.base.finish(view)
    }

    fn handle_action(&self, action: PopupAction) {
        match action {
            PopupAction::Toggle { id, active } if id == "wifi" => self.set_radio(false, active),
            PopupAction::Toggle { id, active } if id == "airplane" => self.set_radio(true, active),
            PopupAction::Item { key, secondary, .. } => match self.op_for(&key, secondary) {
                Some(op) => self.run_op(op, key),
                None => debug!("No network action for {} (secondary={})", key, secondary),
            },
            PopupAction::Button { id } => match id.as_str() {
                "scan" if self.wifi_enabled() => self.start_scan(),
                "disconnect" => match self.active_ssid() {
                    Some(ssid) => self.run_op(NetworkOp::Disconnect, ssid),
                    None => self.base.set_status("Not connected"),
                },
                "settings" => {
                    if let Err(e) = network::open_settings() {
                        self.base.set_status(format!("Could not open network settings: {}", e));
                    }
                }
                other => debug!("Network popup ignores button {}", other),
            },
            other => debug!("Network popup ignores {:?}", other),
        }
        self.base.refresh();
    }
}

impl Popup for NetworkPopup {
    fn base(&self) -> &PopupBase {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel_manager::test_context;
    use crate::services::network::{ActiveConnection, RadioStatus};

    fn wifi(ssid: &str, connected: bool, known: bool) -> WifiNetwork {
        WifiNetwork {
            ssid: ssid.into(),
            signal: 70,
            security: "WPA2".into(),
            connected,
            known,
        }
    }

    fn popup() -> Rc<NetworkPopup> {
        let popup = NetworkPopup::new(&test_context(), Weak::new());
        popup.apply_status(NetworkStatus {
            radio: RadioStatus {
                wifi_enabled: true,
                airplane_mode: false,
            },
            active: Some(ActiveConnection {
                ssid: "HomeNet".into(),
                signal: 81,
            }),
        });
        popup.finish_scan(Ok(vec![
            wifi("HomeNet", true, true),
            wifi("Cafe", false, true),
            wifi("Neighbour", false, false),
        ]));
        popup
    }

    #[test]
    fn test_click_mapping() {
        let popup = popup();
        assert_eq!(popup.op_for("HomeNet", false), Some(NetworkOp::Disconnect));
        assert_eq!(popup.op_for("Neighbour", false), Some(NetworkOp::Connect));
        assert_eq!(popup.op_for("Cafe", true), Some(NetworkOp::Forget));
        assert_eq!(popup.op_for("Neighbour", true), None);
        assert_eq!(popup.op_for("Elsewhere", false), None);
    }

    #[test]
    fn test_render_lists_networks() {
        let popup = popup();
        assert_eq!(popup.base.status().as_deref(), Some("Found 3 networks"));

        let view = popup.render();
        assert!(matches!(view.find("wifi"), Some(Row::Toggle { active: true, .. })));
        match view.find("network") {
            Some(Row::Item { key, subtitle, .. }) => {
                assert_eq!(key, "HomeNet");
                assert!(subtitle.ends_with("Connected"));
            }
            other => panic!("unexpected row {:?}", other),
        }
        assert_eq!(popup.active_ssid().as_deref(), Some("HomeNet"));
    }

    #[test]
    fn test_wifi_off_clears_networks() {
        let popup = popup();
        popup.apply_status(NetworkStatus {
            radio: RadioStatus {
                wifi_enabled: false,
                airplane_mode: true,
            },
            active: None,
        });

        let view = popup.render();
        assert_eq!(view.subtitle, "Airplane mode");
        assert!(!view.rows.iter().any(|row| matches!(row, Row::Item { .. })));
        assert!(popup.networks.borrow().is_empty());
    }

    #[test]
    fn test_cancelled_scan_clears_status() {
        let popup = popup();
        popup.finish_scan(Err(TaskError::Cancelled));
        assert_eq!(popup.base.status(), None);
        assert_eq!(popup.networks.borrow().len(), 3);
    }
}
