use crate::error::PopupError;
use crate::functions::formatting::{uptime_string, used_of_total};
use crate::icons;
use crate::panel_manager::{
    AppContext, Category, PopupAction, PopupFactory, PopupInstance, PopupView, PopupWindow, Row,
    build_window,
};
use crate::panels::{self, Popup, PopupBase, failure_text};
use crate::services::system_info::{self, SystemSnapshot};
use log::{debug, info};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub struct SystemInfoFactory {}

impl SystemInfoFactory {
    pub fn new() -> Self {
        Self {}
    }
}

impl PopupFactory for SystemInfoFactory {
    fn category(&self) -> &str {
        "systeminfo"
    }

    fn title(&self) -> &str {
        "System Information"
    }

    fn create(&self, app: &AppContext, category: &Category) -> Result<Rc<PopupWindow>, PopupError> {
        info!("Creating system info popup");
        Ok(build_window(app, category, self.title(), |window| {
            SystemInfoPopup::new(app, window)
        }))
    }
}

struct SystemInfoPopup {
    base: PopupBase,
    this: Weak<SystemInfoPopup>,
    snapshot: RefCell<Option<SystemSnapshot>>,
}

impl SystemInfoPopup {
    fn new(app: &AppContext, window: Weak<PopupWindow>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            base: PopupBase::new(app, window),
            this: this.clone(),
            snapshot: RefCell::new(None),
        })
    }

    fn refresh_snapshot(&self) {
        if self.base.is_busy() {
            debug!("System snapshot already in progress");
            return;
        }
        panels::spawn(
            &self.this,
            "system_info",
            |ctx| system_info::collect(ctx.token()),
            |popup: &SystemInfoPopup, result| match result {
                Ok(snapshot) => {
                    *popup.snapshot.borrow_mut() = Some(snapshot);
                    popup.base.clear_status();
                }
                Err(e) => {
                    if let Some(text) = failure_text("Could not collect system info", &e) {
                        popup.base.set_status(text);
                    }
                }
            },
        );
    }

    fn snapshot_rows(snapshot: &SystemSnapshot) -> Vec<Row> {
        vec![
            Row::info(
                icons::CPU,
                snapshot.cpu_model.clone(),
                format!("{} cores", snapshot.cpu_cores),
            ),
            Row::progress(
                icons::CPU,
                "CPU",
                format!("{:.1}%", snapshot.cpu_usage),
                snapshot.cpu_usage / 100.0,
            ),
            Row::progress(
                icons::MEMORY,
                "Memory",
                used_of_total(snapshot.mem_used, snapshot.mem_total),
                snapshot.mem_fraction(),
            ),
            Row::progress(
                icons::DISK,
                "Disk",
                used_of_total(snapshot.disk_used, snapshot.disk_total),
                snapshot.disk_fraction(),
            ),
            Row::info(icons::UPTIME, "Uptime", uptime_string(snapshot.uptime_secs)),
        ]
    }
}

impl PopupInstance for SystemInfoPopup {
    fn on_show(&self) {
        self.refresh_snapshot();
    }

    fn on_hide(&self) {
        self.base.cancel_all();
    }

    fn render(&self) -> PopupView {
        let snapshot = self.snapshot.borrow();
        let view = match snapshot.as_ref() {
            Some(snap) => PopupView::new("System Information", format!("{} - {}", snap.host, snap.os))
                .rows(Self::snapshot_rows(snap)),
            None => PopupView::new("System Information", "Collecting...")
                .row(Row::info(icons::INFO, "Loading", "")),
        };
        let view = view.row(Row::buttons(&[("refresh", "Refresh"), ("close", "Close")]));
        self.base.finish(view)
    }

    fn handle_action(&self, action: PopupAction) {
        match action {
            PopupAction::Button { id } if id == "refresh" => self.refresh_snapshot(),
            PopupAction::Button { id } if id == "close" => {
                self.base.close_window();
                return;
            }
            other => debug!("System info popup ignores {:?}", other),
        }
        self.base.refresh();
    }
}

impl Popup for SystemInfoPopup {
    fn base(&self) -> &PopupBase {
        &self.base
    }
}
