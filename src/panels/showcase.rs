//! Demo popup for the background task machinery: a stepped job with
//! streamed progress and cancellation, plus a couple of sample controls.

use crate::error::PopupError;
use crate::icons;
use crate::panel_manager::{
    AppContext, Category, PopupAction, PopupFactory, PopupInstance, PopupView, PopupWindow, Row,
    build_window,
};
use crate::panels::{self, Popup, PopupBase, failure_text};
use capy_tasks::{Cancelled, TaskContext, TaskError, TaskHandle};
use log::{debug, info};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::thread;
use std::time::Duration;

const STEPS: u32 = 10;
const STEP_DURATION: Duration = Duration::from_millis(300);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct ShowcaseFactory {}

impl ShowcaseFactory {
    pub fn new() -> Self {
        Self {}
    }
}

impl PopupFactory for ShowcaseFactory {
    fn category(&self) -> &str {
        "showcase"
    }

    fn title(&self) -> &str {
        "Showcase"
    }

    fn create(&self, app: &AppContext, category: &Category) -> Result<Rc<PopupWindow>, PopupError> {
        info!("Creating showcase popup");
        Ok(build_window(app, category, self.title(), |window| {
            ShowcasePopup::new(app, window)
        }))
    }
}

struct ShowcasePopup {
    base: PopupBase,
    this: Weak<ShowcasePopup>,
    step: Cell<u32>,
    job: RefCell<Option<TaskHandle>>,
    demo_value: Cell<i32>,
    demo_enabled: Cell<bool>,
}

/// Sleeps through `STEPS` steps, reporting each one and stopping when cancelled.
fn stepped_job(ctx: &TaskContext<u32>) -> Result<u32, Cancelled> {
    for step in 1..=STEPS {
        let mut slept = Duration::ZERO;
        while slept < STEP_DURATION {
            ctx.check_cancelled()?;
            thread::sleep(POLL_INTERVAL);
            slept += POLL_INTERVAL;
        }
        ctx.progress(step);
    }
    Ok(STEPS)
}

impl ShowcasePopup {
    fn new(app: &AppContext, window: Weak<PopupWindow>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            base: PopupBase::new(app, window),
            this: this.clone(),
            step: Cell::new(0),
            job: RefCell::new(None),
            demo_value: Cell::new(50),
            demo_enabled: Cell::new(false),
        })
    }

    fn is_running(&self) -> bool {
        self.job
            .borrow()
            .as_ref()
            .is_some_and(|h| self.base.runner().is_active(h.id()))
    }

    fn start(&self) {
        if self.is_running() {
            return;
        }
        self.step.set(0);
        self.base.set_status("Working...");
        let throttle = self.base.config().progress_throttle();

        let handle = panels::spawn_with_progress(
            &self.this,
            "showcase_job",
            Some(throttle),
            stepped_job,
            |popup: &ShowcasePopup, step| popup.apply_step(step),
            |popup: &ShowcasePopup, result| popup.finish(result),
        );
        *self.job.borrow_mut() = handle;
    }

    fn stop(&self) {
        if let Some(handle) = self.job.borrow().as_ref() {
            self.base.cancel(handle);
        }
    }

    fn apply_step(&self, step: u32) {
        // throttled events may skip steps, never go backwards
        if step > self.step.get() {
            self.step.set(step);
            self.base.set_status(format!("Step {} of {}", step, STEPS));
        }
    }

    fn finish(&self, result: Result<u32, TaskError>) {
        self.job.borrow_mut().take();
        match result {
            Ok(steps) => {
                self.step.set(steps);
                self.base.set_status("Done");
            }
            Err(TaskError::Cancelled) => {
                self.base.set_status(format!("Stopped at step {}", self.step.get()));
            }
            Err(e) => {
                if let Some(text) = failure_text("Job failed", &e) {
                    self.base.set_status(text);
                }
            }
        }
    }
}

impl PopupInstance for ShowcasePopup {
    fn on_hide(&self) {
        self.base.cancel_all();
    }

    fn render(&self) -> PopupView {
        let step = self.step.get();
        let run_label = if self.is_running() { "Stop" } else { "Start" };
        let view = PopupView::new("Showcase", "Background tasks demo")
            .row(Row::progress(
                icons::DEMO,
                "Job",
                format!("{}/{}", step, STEPS),
                step as f32 / STEPS as f32,
            ))
            .row(Row::buttons(&[("run", run_label)]))
            .row(Row::Separator)
            .row(Row::slider(
                "demo_slider",
                icons::DEMO,
                "Sample Slider",
                self.demo_value.get(),
                0..=100,
            ))
            .row(Row::toggle(
                "demo_toggle",
                icons::DEMO,
                "Sample Toggle",
                "",
                self.demo_enabled.get(),
            ));
        self.base.finish(view)
    }

    fn handle_action(&self, action: PopupAction) {
        match action {
            PopupAction::Button { id } if id == "run" => {
                if self.is_running() {
                    self.stop();
                } else {
                    self.start();
                }
            }
            PopupAction::Slider { id, value, .. } if id == "demo_slider" => {
                self.demo_value.set(value.clamp(0, 100));
            }
            PopupAction::Toggle { id, active } if id == "demo_toggle" => {
                self.demo_enabled.set(active);
            }
            other => debug!("Showcase popup ignores {:?}", other),
        }
        self.base.refresh();
    }
}

impl Popup for ShowcasePopup {
    fn base(&self) -> &PopupBase {
        &self.base
    }
}
