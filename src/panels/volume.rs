use crate::error::PopupError;
use crate::icons;
use crate::panel_manager::{
    AppContext, Category, PopupAction, PopupFactory, PopupInstance, PopupView, PopupWindow, Row,
    build_window,
};
use crate::panels::{self, Popup, PopupBase, SerialWrite, failure_text};
use crate::services::volume::{self, VolumeStatus};
use capy_tasks::BoxError;
use log::{debug, info};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

const PRESETS: [(&str, &str, i32); 4] = [
    ("preset_25", "25%", 25),
    ("preset_50", "50%", 50),
    ("preset_75", "75%", 75),
    ("preset_100", "100%", 100),
];

pub struct VolumeFactory {}

impl VolumeFactory {
    pub fn new() -> Self {
        Self {}
    }
}

impl PopupFactory for VolumeFactory {
    fn category(&self) -> &str {
        "volume"
    }

    fn title(&self) -> &str {
        "Volume Control"
    }

    fn create(&self, app: &AppContext, category: &Category) -> Result<Rc<PopupWindow>, PopupError> {
        info!("Creating volume popup");
        Ok(build_window(app, category, self.title(), |window| {
            VolumePopup::new(app, window)
        }))
    }
}

struct VolumePopup {
    base: PopupBase,
    this: Weak<VolumePopup>,
    state: RefCell<VolumeStatus>,
    /// Last state known to be on the sink.
    applied: RefCell<Option<VolumeStatus>>,
    writes: SerialWrite<VolumeStatus>,
    loaded: Cell<bool>,
}

impl VolumePopup {
    fn new(app: &AppContext, window: Weak<PopupWindow>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            base: PopupBase::new(app, window),
            this: this.clone(),
            state: RefCell::new(VolumeStatus::default()),
            applied: RefCell::new(None),
            writes: SerialWrite::new(),
            loaded: Cell::new(false),
        })
    }

    fn load(&self) {
        let timeout = self.base.timeout();
        panels::spawn(
            &self.this,
            "volume_read",
            move |_ctx| volume::get_status(timeout),
            |popup: &VolumePopup, result| match result {
                Ok(status) => popup.set_loaded(status),
                Err(e) => {
                    popup.base.set_status(format!("Could not read volume: {}", e));
                }
            },
        );
    }

    fn set_loaded(&self, status: VolumeStatus) {
        self.loaded.set(true);
        self.base.clear_status();
        if self.writes.touched() {
            debug!("Volume changed while reading, keeping {:?}", self.state.borrow());
            return;
        }
        debug!("Volume loaded: {}% muted={}", status.volume_percent, status.muted);
        *self.applied.borrow_mut() = Some(status.clone());
        *self.state.borrow_mut() = status;
    }

    /// Update local state for a new volume; returns the mute change it implies.
    fn update_volume(&self, percent: i32) -> Option<bool> {
        let mut state = self.state.borrow_mut();
        let percent = percent.clamp(0, 100);
        let mute = volume::auto_mute(percent, state.muted);
        state.volume_percent = percent;
        if let Some(muted) = mute {
            state.muted = muted;
        }
        mute
    }

    fn set_volume(&self, percent: i32) {
        self.update_volume(percent);
        self.push_state();
    }

    fn set_muted(&self, muted: bool) {
        self.state.borrow_mut().muted = muted;
        self.push_state();
    }

    fn push_state(&self) {
        let target = self.state.borrow().clone();
        if let Some(target) = self.writes.request(target) {
            self.write(target);
        }
    }

    /// Bring the sink to `target`, touching only what differs from `applied`.
    fn write(&self, target: VolumeStatus) {
        let applied = self.applied.borrow().clone();
        let timeout = self.base.timeout();
        let written = target.clone();

        panels::spawn(
            &self.this,
            "volume_set",
            move |_ctx| -> Result<VolumeStatus, BoxError> {
                if applied.as_ref().is_none_or(|a| a.volume_percent != target.volume_percent) {
                    volume::set_volume(target.volume_percent, timeout)?;
                }
                if applied.as_ref().is_none_or(|a| a.muted != target.muted) {
                    volume::set_mute(target.muted, timeout)?;
                }
                Ok(target)
            },
            move |popup: &VolumePopup, result| {
                match result {
                    Ok(status) => {
                        *popup.applied.borrow_mut() = Some(status);
                        popup.report(None);
                    }
                    Err(e) => {
                        *popup.applied.borrow_mut() = None;
                        popup.report(Some(e));
                    }
                }
                if let Some(next) = popup.writes.complete(&written) {
                    popup.write(next);
                }
            },
        );
    }

    fn report(&self, error: Option<capy_tasks::TaskError>) {
        match error.and_then(|e| failure_text("Volume change failed", &e)) {
            Some(text) => self.base.set_status(text),
            None => self.base.clear_status(),
        }
    }
}

impl PopupInstance for VolumePopup {
    fn on_show(&self) {
        self.load();
    }

    fn on_hide(&self) {
        self.base.cancel_all();
    }

    fn render(&self) -> PopupView {
        let state = self.state.borrow();
        let subtitle = if !self.loaded.get() {
            "Reading current volume...".to_string()
        } else if state.muted {
            "Muted".to_string()
        } else {
            format!("{}%", state.volume_percent)
        };
        let icon = if state.muted { icons::MUTE } else { icons::VOLUME };

        let presets: Vec<(&str, &str)> = PRESETS.iter().map(|(id, label, _)| (*id, *label)).collect();
        let view = PopupView::new("Audio Control", subtitle)
            .row(Row::slider("volume", icon, "Volume", state.volume_percent, 0..=100))
            .row(Row::toggle("mute", icons::MUTE, "Mute", "", state.muted))
            .row(Row::buttons(&presets));
        self.base.finish(view)
    }

    fn handle_action(&self, action: PopupAction) {
        match action {
            PopupAction::Slider { id, value, .. } if id == "volume" => self.set_volume(value),
            PopupAction::Toggle { id, active } if id == "mute" => self.set_muted(active),
            PopupAction::Button { id } => match PRESETS.iter().find(|(p, _, _)| *p == id) {
                Some((_, _, percent)) => self.set_volume(*percent),
                None => debug!("Unknown volume button {}", id),
            },
            other => debug!("Volume popup ignores {:?}", other),
        }
        self.base.refresh();
    }
}

impl Popup for VolumePopup {
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

    const FAKE_PACTL: &str = r#"case "$*" in
  *" 30%") sleep 0.5 ;;
  get-sink-volume*) sleep 0.3; echo "Volume: front-left: 36045 /  55% / -15.58 dB" ;;
  get-sink-mute*) echo "Mute: no" ;;
esac"#;

    /// Popup attached to a live, never presented window.
    fn live_popup(app: &AppContext) -> (Rc<PopupWindow>, Rc<VolumePopup>) {
        let mut popup = None;
        let window = build_window(app, &Category::from("volume"), "Volume Control", |window| {
            let p = VolumePopup::new(app, window);
            popup = Some(Rc::clone(&p));
            p
        });
        (window, popup.unwrap())
    }

    fn volume_writes(tools: &FakeTools) -> Vec<String> {
        tools
            .calls()
            .into_iter()
            .filter(|call| call.contains("set-sink-volume"))
            .collect()
    }

    #[test]
    fn test_zero_volume_mutes_and_raise_unmutes() {
        let popup = VolumePopup::new(&test_context(), Weak::new());
        assert_eq!(popup.update_volume(0), Some(true));
        assert!(popup.state.borrow().muted);

        assert_eq!(popup.update_volume(40), Some(false));
        assert!(!popup.state.borrow().muted);
        assert_eq!(popup.update_volume(60), None);
    }

    #[test]
    fn test_volume_is_clamped() {
        let popup = VolumePopup::new(&test_context(), Weak::new());
        popup.update_volume(150);
        assert_eq!(popup.state.borrow().volume_percent, 100);
    }

    #[test]
    fn test_render_before_and_after_load() {
        let popup = VolumePopup::new(&test_context(), Weak::new());
        assert_eq!(popup.render().subtitle, "Reading current volume...");

        popup.set_loaded(VolumeStatus {
            volume_percent: 65,
            muted: false,
        });
        let view = popup.render();
        assert_eq!(view.subtitle, "65%");
        assert!(matches!(view.find("volume"), Some(Row::Slider { value: 65, .. })));
        assert!(matches!(view.find("mute"), Some(Row::Toggle { active: false, .. })));
    }

    #[test]
    fn test_rapid_changes_end_on_latest_value() {
        let tools = FakeTools::new();
        tools.install("pactl", FAKE_PACTL);
        let app = test_context();
        let (_window, popup) = live_popup(&app);

        popup.set_volume(30);
        popup.set_volume(20);
        popup.set_volume(10);
        assert!(app.runner.run_until_idle(Duration::from_secs(5)));

        assert_eq!(popup.state.borrow().volume_percent, 10);
        assert_eq!(
            volume_writes(&tools),
            vec![
                "pactl set-sink-volume @DEFAULT_SINK@ 30%",
                "pactl set-sink-volume @DEFAULT_SINK@ 10%",
            ]
        );
        assert_eq!(
            *popup.applied.borrow(),
            Some(VolumeStatus {
                volume_percent: 10,
                muted: false,
            })
        );
        assert_eq!(popup.base.status(), None);
    }

    #[test]
    fn test_reading_after_user_change_is_ignored() {
        let tools = FakeTools::new();
        tools.install("pactl", FAKE_PACTL);
        let app = test_context();
        let (_window, popup) = live_popup(&app);

        popup.load();
        popup.set_volume(20);
        assert!(app.runner.run_until_idle(Duration::from_secs(5)));

        assert!(popup.loaded.get());
        assert_eq!(popup.state.borrow().volume_percent, 20);
        assert_eq!(
            volume_writes(&tools).last().map(String::as_str),
            Some("pactl set-sink-volume @DEFAULT_SINK@ 20%")
        );
    }

    #[test]
    fn test_reading_without_user_change_is_applied() {
        let tools = FakeTools::new();
        tools.install("pactl", FAKE_PACTL);
        let app = test_context();
        let (_window, popup) = live_popup(&app);

        popup.load();
        assert!(app.runner.run_until_idle(Duration::from_secs(5)));

        assert_eq!(popup.state.borrow().volume_percent, 55);
        assert!(volume_writes(&tools).is_empty());
    }
}
