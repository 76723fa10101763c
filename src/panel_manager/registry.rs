//! Open window table: at most one live popup per category.

use super::Category;
use super::window::PopupWindow;
use crate::error::PopupError;
use log::{debug, info, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Result of a toggle request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleOutcome {
    Opened,
    Closed,
    /// A hidden window was presented again.
    Raised,
}

/// Category -> live window.
///
/// Entries are added on creation and removed by the window's own destroy
/// hook, so every close path keeps the table in sync.
#[derive(Clone, Default)]
pub struct WindowRegistry {
    open: Rc<RefCell<HashMap<Category, Rc<PopupWindow>>>>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open, close or raise the popup of `category`.
    ///
    /// `create` is only called when no live window exists.
    pub fn toggle<F>(&self, category: &Category, create: F) -> Result<ToggleOutcome, PopupError>
    where
        F: FnOnce() -> Result<Rc<PopupWindow>, PopupError>,
    {
        if let Some(existing) = self.get(category) {
            if existing.is_visible() {
                info!("Closing popup '{}'", category);
                existing.close();
                return Ok(ToggleOutcome::Closed);
            }
            info!("Raising hidden popup '{}'", category);
            existing.present();
            return Ok(ToggleOutcome::Raised);
        }

        let window = create()?;
        self.insert(category.clone(), &window);
        info!("Opening popup '{}'", category);
        window.present();
        Ok(ToggleOutcome::Opened)
    }

    /// Live window of `category`. Destroyed leftovers are purged on the way.
    pub fn get(&self, category: &Category) -> Option<Rc<PopupWindow>> {
        let mut open = self.open.borrow_mut();
        let window = open.get(category).cloned()?;
        if window.is_destroyed() {
            warn!("Purging destroyed popup '{}' from the registry", category);
            open.remove(category);
            return None;
        }
        Some(window)
    }

    pub fn contains(&self, category: &Category) -> bool {
        self.get(category).is_some()
    }

    pub fn len(&self) -> usize {
        self.open.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.borrow().is_empty()
    }

    pub fn categories(&self) -> Vec<Category> {
        let mut categories: Vec<Category> = self.open.borrow().keys().cloned().collect();
        categories.sort();
        categories
    }

    /// Destroy every open window.
    pub fn close_all(&self) {
        let windows: Vec<Rc<PopupWindow>> = self.open.borrow().values().cloned().collect();
        if !windows.is_empty() {
            info!("Closing {} open popup(s)", windows.len());
        }
        for window in windows {
            window.close();
        }
        self.open.borrow_mut().clear();
    }

    fn insert(&self, category: Category, window: &Rc<PopupWindow>) {
        let table = Rc::downgrade(&self.open);
        let key = category.clone();
        window.connect_destroy(move |closed| {
            let Some(table) = table.upgrade() else {
                return;
            };
            let mut open = table.borrow_mut();
            // A late hook must never evict a newer window.
            if open
                .get(&key)
                .is_some_and(|current| std::ptr::eq(Rc::as_ptr(current), closed))
            {
                open.remove(&key);
                debug!("Popup '{}' removed from registry", key);
            }
        });

        if let Some(previous) = self.open.borrow_mut().insert(category, Rc::clone(window)) {
            warn!(
                "Replaced a registry entry for '{}' that was still present",
                previous.category()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel_manager::{LogSurface, PopupInstance, PopupView};

    struct Empty;

    impl PopupInstance for Empty {
        fn render(&self) -> PopupView {
            PopupView::new("Empty", "")
        }
    }

    fn make(category: &Category, created: &Rc<RefCell<u32>>) -> Result<Rc<PopupWindow>, PopupError> {
        *created.borrow_mut() += 1;
        let window = PopupWindow::new(category.clone(), "Empty", Rc::new(LogSurface));
        window.set_content(Rc::new(Empty));
        Ok(window)
    }

    #[test]
    fn test_toggle_open_close_reopen() {
        let registry = WindowRegistry::new();
        let category = Category::from("volume");
        let created = Rc::new(RefCell::new(0));

        let first = registry.toggle(&category, || make(&category, &created)).unwrap();
        assert_eq!(first, ToggleOutcome::Opened);
        assert_eq!(registry.len(), 1);

        let second = registry.toggle(&category, || make(&category, &created)).unwrap();
        assert_eq!(second, ToggleOutcome::Closed);
        assert!(registry.is_empty());

        let third = registry.toggle(&category, || make(&category, &created)).unwrap();
        assert_eq!(third, ToggleOutcome::Opened);
        assert_eq!(registry.len(), 1);
        assert_eq!(*created.borrow(), 2);
    }

    #[test]
    fn test_external_close_removes_entry() {
        let registry = WindowRegistry::new();
        let category = Category::from("network");
        let created = Rc::new(RefCell::new(0));

        registry.toggle(&category, || make(&category, &created)).unwrap();
        registry.get(&category).unwrap().close();

        assert!(!registry.contains(&category));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_hidden_window_is_raised_not_duplicated() {
        let registry = WindowRegistry::new();
        let category = Category::from("battery");
        let created = Rc::new(RefCell::new(0));

        registry.toggle(&category, || make(&category, &created)).unwrap();
        let window = registry.get(&category).unwrap();
        window.hide();

        let outcome = registry.toggle(&category, || make(&category, &created)).unwrap();
        assert_eq!(outcome, ToggleOutcome::Raised);
        assert!(window.is_visible());
        assert_eq!(*created.borrow(), 1);
    }

    #[test]
    fn test_destroyed_entry_is_treated_as_closed() {
        let registry = WindowRegistry::new();
        let category = Category::from("bluetooth");
        let created = Rc::new(RefCell::new(0));

        // Entry whose hook never got wired.
        let stale = make(&category, &created).unwrap();
        registry
            .open
            .borrow_mut()
            .insert(category.clone(), Rc::clone(&stale));
        stale.close();

        let outcome = registry.toggle(&category, || make(&category, &created)).unwrap();
        assert_eq!(outcome, ToggleOutcome::Opened);
        let current = registry.get(&category).unwrap();
        assert!(!Rc::ptr_eq(&current, &stale));
        assert!(!current.is_destroyed());
    }

    #[test]
    fn test_late_hook_does_not_evict_newer_window() {
        let registry = WindowRegistry::new();
        let category = Category::from("showcase");
        let created = Rc::new(RefCell::new(0));

        let old = make(&category, &created).unwrap();
        registry.insert(category.clone(), &old);
        // Simulate a replacement that happened before the old hook ran.
        let newer = make(&category, &created).unwrap();
        registry
            .open
            .borrow_mut()
            .insert(category.clone(), Rc::clone(&newer));

        old.close();
        let current = registry.get(&category).unwrap();
        assert!(Rc::ptr_eq(&current, &newer));
    }

    #[test]
    fn test_failed_create_leaves_table_unchanged() {
        let registry = WindowRegistry::new();
        let category = Category::from("systeminfo");

        let result = registry.toggle(&category, || Err(PopupError::Other("no display".into())));
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_all() {
        let registry = WindowRegistry::new();
        let created = Rc::new(RefCell::new(0));
        for name in ["volume", "battery"] {
            let category = Category::from(name);
            registry.toggle(&category, || make(&category, &created)).unwrap();
        }
        assert_eq!(
            registry.categories(),
            vec![Category::from("battery"), Category::from("volume")]
        );

        let windows: Vec<_> = registry
            .categories()
            .iter()
            .filter_map(|c| registry.get(c))
            .collect();
        registry.close_all();

        assert!(registry.is_empty());
        assert!(windows.iter().all(|w| w.is_destroyed()));
    }
}
