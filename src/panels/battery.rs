use crate::error::PopupError;
use crate::icons;
use crate::panel_manager::{
    AppContext, Category, PopupAction, PopupFactory, PopupInstance, PopupView, PopupWindow, Row,
    build_window,
};
use crate::panels::{self, Popup, PopupBase, failure_text};
use crate::services::battery::{self, BatteryStatus, DEFAULT_LIMIT, LIMIT_MAX, LIMIT_MIN, LIMIT_STEP};
use crate::services::command::notify;
use log::{debug, info};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

pub struct BatteryFactory {}

impl BatteryFactory {
    pub fn new() -> Self {
        Self {}
    }
}

impl PopupFactory for BatteryFactory {
    fn category(&self) -> &str {
        "battery"
    }

    fn title(&self) -> &str {
        "Battery Charging Limit"
    }

    fn create(&self, app: &AppContext, category: &Category) -> Result<Rc<PopupWindow>, PopupError> {
        info!("Creating battery popup");
        Ok(build_window(app, category, self.title(), |window| {
            BatteryPopup::new(app, window)
        }))
    }
}

struct BatteryPopup {
    base: PopupBase,
    this: Weak<BatteryPopup>,
    limit: Cell<u8>,
    battery: RefCell<Option<BatteryStatus>>,
}

impl BatteryPopup {
    fn new(app: &AppContext, window: Weak<PopupWindow>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            base: PopupBase::new(app, window),
            this: this.clone(),
            limit: Cell::new(DEFAULT_LIMIT),
            battery: RefCell::new(None),
        })
    }

    fn load(&self) {
        let threshold = self.base.config().battery_threshold_path.clone();
        panels::spawn(
            &self.this,
            "battery_read",
            move |_ctx| Ok::<_, PopupError>((battery::read_threshold(&threshold), battery::get_status())),
            |popup: &BatteryPopup, result| match result {
                Ok((limit, status)) => popup.apply_reading(limit, status),
                Err(e) => {
                    if let Some(text) = failure_text("Could not read battery", &e) {
                        popup.base.set_status(text);
                    }
                }
            },
        );
    }

    fn apply_reading(&self, limit: u8, status: Option<BatteryStatus>) {
        debug!("Battery limit {}%, status {:?}", limit, status);
        self.limit.set(battery::snap_limit(limit as i32));
        *self.battery.borrow_mut() = status;
    }

    /// Slider moved; returns the snapped value.
    fn preview(&self, value: i32) -> u8 {
        let limit = battery::snap_limit(value);
        self.limit.set(limit);
        limit
    }

    fn apply(&self, value: i32) {
        let limit = self.preview(value);
        let config = self.base.config();
        let helper = config.battery_limit_helper.clone();
        let limit_file = config.battery_limit_file.clone();
        let timeout = self.base.timeout();

        self.base.set_status(format!("Setting charging limit to {}%...", limit));
        panels::spawn(
            &self.this,
            "battery_limit",
            move |_ctx| -> Result<(), PopupError> {
                battery::apply_limit(&helper, &limit_file, limit, timeout)?;
                notify("Battery", &format!("Charging limit set to {}%", limit));
                Ok(())
            },
            move |popup: &BatteryPopup, result| match result {
                Ok(()) => popup
                    .base
                    .set_status(format!("Charging limit set to {}%", limit)),
                Err(e) => match failure_text("Failed to set charging limit", &e) {
                    Some(text) => popup.base.set_status(text),
                    None => popup.base.clear_status(),
                },
            },
        );
    }

    fn battery_row(&self) -> Row {
        match self.battery.borrow().as_ref() {
            Some(status) => {
                let state = if status.state.is_charging() {
                    "Charging"
                } else {
                    "Discharging"
                };
                let subtitle = if status.time_remaining.is_empty() {
                    state.to_string()
                } else {
                    format!("{} - {}", state, status.time_remaining)
                };
                Row::info(
                    icons::battery(status.state),
                    format!("{}%", status.percentage),
                    subtitle,
                )
            }
            None => Row::info(icons::INFO, "No battery", "Status unavailable"),
        }
    }
}

impl PopupInstance for BatteryPopup {
    fn on_show(&self) {
        self.load();
    }

    fn on_hide(&self) {
        self.base.cancel_all();
    }

    fn render(&self) -> PopupView {
        let limit = self.limit.get();
        let view = PopupView::new("Charging Limit", format!("Stop charging at {}%", limit))
            .row(self.battery_row())
            .row(
                Row::slider(
                    "limit",
                    icons::BATTERY_LIMIT,
                    "Charging Limit",
                    limit as i32,
                    LIMIT_MIN as i32..=LIMIT_MAX as i32,
                )
                .step(LIMIT_STEP as i32)
                .on_release(),
            );
        self.base.finish(view)
    }

    fn handle_action(&self, action: PopupAction) {
        match action {
            PopupAction::Slider {
                id,
                value,
                released,
            } if id == "limit" => {
                if released {
                    self.apply(value);
                } else {
                    self.preview(value);
                }
            }
            other => debug!("Battery popup ignores {:?}", other),
        }
        self.base.refresh();
    }
}

impl Popup for BatteryPopup {
    fn base(&self) -> &PopupBase {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::battery::BatteryState;
    use crate::panel_manager::test_context;

    #[test]
    fn test_preview_snaps_to_step() {
        let popup = BatteryPopup::new(&test_context(), Weak::new());
        assert_eq!(popup.preview(83), 85);
        assert_eq!(popup.preview(20), 50);
        assert_eq!(popup.limit.get(), 50);
    }

    #[test]
    fn test_render_with_reading() {
        let popup = BatteryPopup::new(&test_context(), Weak::new());
        popup.apply_reading(
            60,
            Some(BatteryStatus {
                percentage: 57,
                state: BatteryState::Charging30,
                time_remaining: "1h 20m".into(),
            }),
        );

        let view = popup.render();
        assert_eq!(view.subtitle, "Stop charging at 60%");
        match &view.rows[0] {
            Row::Info { title, subtitle, .. } => {
                assert_eq!(title, "57%");
                assert_eq!(subtitle, "Charging - 1h 20m");
            }
            other => panic!("unexpected row {:?}", other),
        }
        assert!(matches!(
            view.find("limit"),
            Some(Row::Slider {
                value: 60,
                min: 50,
                max: 100,
                step: 5,
                ..
            })
        ));
    }

    #[test]
    fn test_render_without_battery() {
        let popup = BatteryPopup::new(&test_context(), Weak::new());
        let view = popup.render();
        assert!(matches!(&view.rows[0], Row::Info { title, .. } if title == "No battery"));
        assert!(matches!(view.find("limit"), Some(Row::Slider { value: 80, .. })));
    }
}
