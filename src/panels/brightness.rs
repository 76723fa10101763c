use crate::error::PopupError;
use crate::icons;
use crate::panel_manager::{
    AppContext, Category, PopupAction, PopupFactory, PopupInstance, PopupView, PopupWindow, Row,
    build_window,
};
use crate::panels::{self, Popup, PopupBase, SerialWrite, failure_text};
use crate::services::brightness::{self, BrightnessStatus, ThemeMode};
use capy_tasks::TaskError;
use log::{debug, info};
use std::cell::Cell;
use std::rc::{Rc, Weak};

const LAPTOP_FALLBACK: u8 = 75;
const EXTERNAL_FALLBACK: u8 = 50;

pub struct BrightnessFactory {}

impl BrightnessFactory {
    pub fn new() -> Self {
        Self {}
    }
}

impl PopupFactory for BrightnessFactory {
    fn category(&self) -> &str {
        "brightness"
    }

    fn title(&self) -> &str {
        "Brightness Control"
    }

    fn create(&self, app: &AppContext, category: &Category) -> Result<Rc<PopupWindow>, PopupError> {
        info!("Creating brightness popup");
        Ok(build_window(app, category, self.title(), |window| {
            BrightnessPopup::new(app, window)
        }))
    }
}

struct BrightnessPopup {
    base: PopupBase,
    this: Weak<BrightnessPopup>,
    laptop: Cell<u8>,
    external: Cell<u8>,
    external_available: Cell<bool>,
    theme: Cell<ThemeMode>,
    laptop_writes: SerialWrite<u8>,
    external_writes: SerialWrite<u8>,
    loaded: Cell<bool>,
}

impl BrightnessPopup {
    fn new(app: &AppContext, window: Weak<PopupWindow>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            base: PopupBase::new(app, window),
            this: this.clone(),
            laptop: Cell::new(LAPTOP_FALLBACK),
            external: Cell::new(EXTERNAL_FALLBACK),
            external_available: Cell::new(true),
            theme: Cell::new(ThemeMode::default()),
            laptop_writes: SerialWrite::new(),
            external_writes: SerialWrite::new(),
            loaded: Cell::new(false),
        })
    }

    fn load(&self) {
        let timeout = self.base.timeout();
        let cache = self.base.config().theme_mode_cache.clone();
        panels::spawn(
            &self.this,
            "brightness_read",
            move |_ctx| Ok::<_, PopupError>(brightness::get_status(timeout, &cache)),
            |popup: &BrightnessPopup, result| match result {
                Ok(status) => popup.apply_status(status),
                Err(e) => popup.report("Could not read brightness", e),
            },
        );
    }

    /// Missing readings keep the fallback values; controls the user already
    /// moved keep their position.
    fn apply_status(&self, status: BrightnessStatus) {
        if let Some(laptop) = status.laptop.filter(|_| !self.laptop_writes.touched()) {
            self.laptop.set(laptop);
        }
        if !self.external_writes.touched() {
            match status.external {
                Some(external) => self.external.set(external),
                None => self.external_available.set(false),
            }
        }
        self.theme.set(status.theme);
        self.loaded.set(true);
    }

    fn set_laptop(&self, value: i32) {
        let percent = to_percent(value);
        self.laptop.set(percent);
        if let Some(percent) = self.laptop_writes.request(percent) {
            self.write_laptop(percent);
        }
    }

    fn write_laptop(&self, percent: u8) {
        let timeout = self.base.timeout();
        panels::spawn(
            &self.this,
            "brightness_laptop",
            move |_ctx| brightness::set_laptop(percent, timeout),
            move |popup: &BrightnessPopup, result| {
                if let Err(e) = result {
                    popup.report("Laptop brightness failed", e);
                }
                if let Some(next) = popup.laptop_writes.complete(&percent) {
                    popup.write_laptop(next);
                }
            },
        );
    }

    fn set_external(&self, value: i32) {
        let percent = to_percent(value);
        self.external.set(percent);
        if let Some(percent) = self.external_writes.request(percent) {
            self.write_external(percent);
        }
    }

    fn write_external(&self, percent: u8) {
        panels::spawn(
            &self.this,
            "brightness_external",
            move |_ctx| brightness::set_external(percent),
            move |popup: &BrightnessPopup, result| {
                if let Err(e) = result {
                    popup.report("External brightness failed", e);
                }
                if let Some(next) = popup.external_writes.complete(&percent) {
                    popup.write_external(next);
                }
            },
        );
    }

    fn toggle_theme(&self) {
        let script = self.base.config().theme_toggle_script.clone();
        let cache = self.base.config().theme_mode_cache.clone();
        let timeout = self.base.timeout();
        panels::spawn(
            &self.this,
            "theme_toggle",
            move |_ctx| -> Result<ThemeMode, PopupError> {
                brightness::toggle_theme(&script, timeout)?;
                Ok(brightness::read_theme_mode(&cache))
            },
            |popup: &BrightnessPopup, result| match result {
                Ok(mode) => {
                    popup.theme.set(mode);
                    popup.base.clear_status();
                }
                Err(e) => popup.report("Theme toggle failed", e),
            },
        );
    }

    fn report(&self, context: &str, err: TaskError) {
        if let Some(text) = failure_text(context, &err) {
            self.base.set_status(text);
        }
    }
}

fn to_percent(value: i32) -> u8 {
    value.clamp(0, 100) as u8
}

impl PopupInstance for BrightnessPopup {
    fn on_show(&self) {
        self.load();
    }

    fn on_hide(&self) {
        self.base.cancel_all();
    }

    fn render(&self) -> PopupView {
        let subtitle = if self.loaded.get() {
            ""
        } else {
            "Reading brightness..."
        };
        let external_label = if self.external_available.get() {
            "External Monitor"
        } else {
            "External Monitor (unavailable)"
        };
        let light = self.theme.get().is_light();

        let view = PopupView::new("Display", subtitle)
            .row(Row::slider(
                "laptop",
                icons::BRIGHTNESS,
                "Laptop",
                self.laptop.get() as i32,
                0..=100,
            ))
            .row(
                Row::slider(
                    "external",
                    icons::MONITOR,
                    external_label,
                    self.external.get() as i32,
                    0..=100,
                )
                .on_release(),
            )
            .row(Row::toggle(
                "theme",
                icons::THEME,
                "Light Theme",
                if light { "Light mode" } else { "Dark mode" },
                light,
            ));
        self.base.finish(view)
    }

    fn handle_action(&self, action: PopupAction) {
        match action {
            PopupAction::Slider { id, value, .. } if id == "laptop" => self.set_laptop(value),
            // DDC writes are slow, only apply the final position
            PopupAction::Slider {
                id,
                value,
                released: true,
            } if id == "external" => self.set_external(value),
            PopupAction::Toggle { id, .. } if id == "theme" => self.toggle_theme(),
            other => debug!("Brightness popup ignores {:?}", other),
        }
        self.base.refresh();
    }
}

impl Popup for BrightnessPopup {
    fn base(&self) -> &PopupBase {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel_manager::test_context;
    use crate::panels::fake_tools::FakeTools;
    use std::time::Duration;

    #[test]
    fn test_fallback_values_until_loaded() {
        let popup = BrightnessPopup::new(&test_context(), Weak::new());
        let view = popup.render();
        assert_eq!(view.subtitle, "Reading brightness...");
        assert!(matches!(view.find("laptop"), Some(Row::Slider { value: 75, .. })));
        assert!(matches!(
            view.find("external"),
            Some(Row::Slider {
                value: 50,
                apply_on_release: true,
                ..
            })
        ));
    }

    #[test]
    fn test_apply_status_keeps_missing_readings() {
        let popup = BrightnessPopup::new(&test_context(), Weak::new());
        popup.apply_status(BrightnessStatus {
            laptop: Some(40),
            external: None,
            theme: ThemeMode::Light,
        });

        let view = popup.render();
        assert!(matches!(view.find("laptop"), Some(Row::Slider { value: 40, .. })));
        match view.find("external") {
            Some(Row::Slider { value, label, .. }) => {
                assert_eq!(*value, 50);
                assert_eq!(label, "External Monitor (unavailable)");
            }
            other => panic!("unexpected row {:?}", other),
        }
        assert!(matches!(view.find("theme"), Some(Row::Toggle { active: true, .. })));
    }

    #[test]
    fn test_to_percent() {
        assert_eq!(to_percent(-5), 0);
        assert_eq!(to_percent(55), 55);
        assert_eq!(to_percent(180), 100);
    }

    #[test]
    fn test_reading_keeps_moved_slider() {
        let popup = BrightnessPopup::new(&test_context(), Weak::new());
        // a write for the laptop panel is in flight
        assert_eq!(popup.laptop_writes.request(20), Some(20));
        popup.laptop.set(20);

        popup.apply_status(BrightnessStatus {
            laptop: Some(90),
            external: Some(30),
            theme: ThemeMode::Dark,
        });
        assert_eq!(popup.laptop.get(), 20);
        assert_eq!(popup.external.get(), 30);
    }

    #[test]
    fn test_laptop_writes_are_serialised() {
        let tools = FakeTools::new();
        tools.install("brightnessctl", r#"case "$*" in *" 30%") sleep 0.5 ;; esac"#);
        let app = test_context();
        let mut popup = None;
        let category = Category::from("brightness");
        let _window = build_window(&app, &category, "Brightness Control", |window| {
            let p = BrightnessPopup::new(&app, window);
            popup = Some(Rc::clone(&p));
            p
        });
        let popup = popup.unwrap();

        popup.set_laptop(30);
        popup.set_laptop(60);
        popup.set_laptop(45);
        assert!(app.runner.run_until_idle(Duration::from_secs(5)));

        assert_eq!(popup.laptop.get(), 45);
        assert_eq!(tools.calls(), vec!["brightnessctl set 30%", "brightnessctl set 45%"]);
    }
}
