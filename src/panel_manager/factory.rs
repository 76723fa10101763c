use crate::error::PopupError;
use crate::panel_manager::{AppContext, Category, PopupInstance, PopupWindow};
use std::rc::{Rc, Weak};

/// Trait that defines a factory for one kind of popup (e.g. volume, bluetooth).
pub trait PopupFactory {
    /// Category this factory answers to on the command line.
    fn category(&self) -> &str;

    /// Window title.
    fn title(&self) -> &str;

    /// Build a new, not yet presented, window for `category`.
    /// This is where the popup content is created and wired to the window.
    fn create(&self, app: &AppContext, category: &Category) -> Result<Rc<PopupWindow>, PopupError>;
}

/// Create a window and hand a weak reference to it to the content constructor.
pub fn build_window<P, F>(app: &AppContext, category: &Category, title: &str, make: F) -> Rc<PopupWindow>
where
    P: PopupInstance + 'static,
    F: FnOnce(Weak<PopupWindow>) -> Rc<P>,
{
    let window = PopupWindow::new(category.clone(), title, Rc::clone(&app.surface));
    let content = make(Rc::downgrade(&window));
    window.set_content(content);
    window
}
