//! Popup window handle.
//!
//! A window owns its popup content and forwards rendering to the shared
//! surface. Closing is one-way: once destroyed, a window never renders again
//! and its destruction hooks have run exactly once.

use super::view::{PopupAction, Surface};
use super::{Category, PopupInstance};
use log::debug;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

type DestroyHook = Box<dyn FnOnce(&PopupWindow)>;

pub struct PopupWindow {
    category: Category,
    title: String,
    surface: Rc<dyn Surface>,
    visible: Cell<bool>,
    destroyed: Cell<bool>,
    content: RefCell<Option<Rc<dyn PopupInstance>>>,
    destroy_hooks: RefCell<Vec<DestroyHook>>,
}

impl PopupWindow {
    pub fn new(category: Category, title: &str, surface: Rc<dyn Surface>) -> Rc<Self> {
        Rc::new(Self {
            category,
            title: title.to_string(),
            surface,
            visible: Cell::new(false),
            destroyed: Cell::new(false),
            content: RefCell::new(None),
            destroy_hooks: RefCell::new(Vec::new()),
        })
    }

    pub fn category(&self) -> &Category {
        &self.category
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_content(&self, content: Rc<dyn PopupInstance>) {
        *self.content.borrow_mut() = Some(content);
    }

    /// Run `hook` when the window is destroyed, whatever the close path.
    pub fn connect_destroy(&self, hook: impl FnOnce(&PopupWindow) + 'static) {
        if self.destroyed.get() {
            hook(self);
            return;
        }
        self.destroy_hooks.borrow_mut().push(Box::new(hook));
    }

    pub fn is_visible(&self) -> bool {
        self.visible.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Show the window (or raise it again) and render its content.
    pub fn present(&self) {
        if self.destroyed.get() {
            return;
        }
        let was_visible = self.visible.replace(true);
        if !was_visible {
            debug!("Showing popup '{}'", self.category);
            if let Some(content) = self.content() {
                content.on_show();
            }
        }
        self.render();
    }

    /// Hide without destroying. In-flight work of the popup is cancelled.
    pub fn hide(&self) {
        if self.destroyed.get() || !self.visible.replace(false) {
            return;
        }
        if let Some(content) = self.content() {
            content.on_hide();
        }
        self.surface.hide(&self.category);
    }

    /// Push the current view to the surface. No-op unless alive and visible.
    pub fn render(&self) {
        if self.destroyed.get() || !self.visible.get() {
            return;
        }
        if let Some(content) = self.content() {
            let view = content.render();
            self.surface.present(&self.category, &view);
        }
    }

    pub fn handle_action(&self, action: PopupAction) {
        if self.destroyed.get() {
            debug!("Ignoring {:?} for destroyed popup '{}'", action, self.category);
            return;
        }
        match action {
            PopupAction::Close => self.close(),
            action => {
                if let Some(content) = self.content() {
                    content.handle_action(action);
                }
            }
        }
    }

    /// Destroy the window. Idempotent.
    pub fn close(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        self.visible.set(false);
        debug!("Destroying popup '{}'", self.category);

        let content = self.content.borrow_mut().take();
        if let Some(content) = &content {
            content.on_hide();
        }
        self.surface.close(&self.category);

        let hooks = std::mem::take(&mut *self.destroy_hooks.borrow_mut());
        for hook in hooks {
            hook(self);
        }
    }

    fn content(&self) -> Option<Rc<dyn PopupInstance>> {
        self.content.borrow().clone()
    }
}
