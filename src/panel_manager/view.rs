//! What a popup shows and what the user can do with it.
//!
//! Popups describe their content as a [`PopupView`]; a [`Surface`] turns that
//! into pixels (or log lines) and reports interactions back as [`PopupAction`]s.

use super::Category;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Rendering backend for popup windows.
pub trait Surface {
    /// Show (or refresh) the popup for `category`.
    fn present(&self, category: &Category, view: &PopupView);

    /// Popup got hidden without being destroyed.
    fn hide(&self, _category: &Category) {}

    /// Popup is gone for good.
    fn close(&self, category: &Category);
}

/// Surface that writes every rendered view to the log.
#[derive(Default)]
pub struct LogSurface;

impl Surface for LogSurface {
    fn present(&self, category: &Category, view: &PopupView) {
        info!(
            "[{}] {} - {} ({} rows){}",
            category,
            view.title,
            view.subtitle,
            view.rows.len(),
            view.status
                .as_deref()
                .map(|s| format!(" | {}", s))
                .unwrap_or_default()
        );
        match serde_json::to_string(view) {
            Ok(json) => debug!("[{}] {}", category, json),
            Err(e) => debug!("[{}] view not serializable: {}", category, e),
        }
    }

    fn hide(&self, category: &Category) {
        info!("[{}] hidden", category);
    }

    fn close(&self, category: &Category) {
        info!("[{}] closed", category);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PopupView {
    pub title: String,
    pub subtitle: String,
    pub rows: Vec<Row>,
    /// Inline status line (task results, errors).
    pub status: Option<String>,
    /// Some background work is running for this popup.
    pub busy: bool,
}

impl PopupView {
    pub fn new(title: impl Into<String>, subtitle: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            subtitle: subtitle.into(),
            ..Default::default()
        }
    }

    pub fn row(mut self, row: Row) -> Self {
        self.rows.push(row);
        self
    }

    pub fn rows(mut self, rows: impl IntoIterator<Item = Row>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// First interactive row with the given id.
    pub fn find(&self, id: &str) -> Option<&Row> {
        self.rows.iter().find(|row| row.id() == Some(id))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Button {
    pub id: String,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Row {
    Info {
        icon: String,
        title: String,
        subtitle: String,
    },
    Slider {
        id: String,
        icon: String,
        label: String,
        value: i32,
        min: i32,
        max: i32,
        step: i32,
        /// Only report the value once the user lets go.
        apply_on_release: bool,
    },
    Toggle {
        id: String,
        icon: String,
        title: String,
        subtitle: String,
        active: bool,
    },
    Progress {
        icon: String,
        title: String,
        subtitle: String,
        /// 0.0 - 1.0
        fraction: f32,
        text: String,
    },
    Item {
        id: String,
        key: String,
        icon: String,
        title: String,
        subtitle: String,
    },
    Buttons {
        buttons: Vec<Button>,
    },
    Separator,
}

impl Row {
    pub fn info(icon: &str, title: impl Into<String>, subtitle: impl Into<String>) -> Self {
        Row::Info {
            icon: icon.to_string(),
            title: title.into(),
            subtitle: subtitle.into(),
        }
    }

    pub fn slider(id: &str, icon: &str, label: &str, value: i32, range: RangeInclusive<i32>) -> Self {
        Row::Slider {
            id: id.to_string(),
            icon: icon.to_string(),
            label: label.to_string(),
            value: value.clamp(*range.start(), *range.end()),
            min: *range.start(),
            max: *range.end(),
            step: 1,
            apply_on_release: false,
        }
    }

    /// Builder tweak for sliders; no-op on other rows.
    pub fn step(mut self, step_by: i32) -> Self {
        if let Row::Slider { step, .. } = &mut self {
            *step = step_by;
        }
        self
    }

    /// Builder tweak for sliders; no-op on other rows.
    pub fn on_release(mut self) -> Self {
        if let Row::Slider {
            apply_on_release, ..
        } = &mut self
        {
            *apply_on_release = true;
        }
        self
    }

    pub fn toggle(
        id: &str,
        icon: &str,
        title: impl Into<String>,
        subtitle: impl Into<String>,
        active: bool,
    ) -> Self {
        Row::Toggle {
            id: id.to_string(),
            icon: icon.to_string(),
            title: title.into(),
            subtitle: subtitle.into(),
            active,
        }
    }

    pub fn progress(icon: &str, title: &str, subtitle: impl Into<String>, fraction: f32) -> Self {
        let fraction = fraction.clamp(0.0, 1.0);
        Row::Progress {
            icon: icon.to_string(),
            title: title.to_string(),
            subtitle: subtitle.into(),
            fraction,
            text: format!("{:.0}%", fraction * 100.0),
        }
    }

    pub fn item(
        id: &str,
        key: impl Into<String>,
        icon: &str,
        title: impl Into<String>,
        subtitle: impl Into<String>,
    ) -> Self {
        Row::Item {
            id: id.to_string(),
            key: key.into(),
            icon: icon.to_string(),
            title: title.into(),
            subtitle: subtitle.into(),
        }
    }

    /// `(id, label)` pairs.
    pub fn buttons(buttons: &[(&str, &str)]) -> Self {
        Row::Buttons {
            buttons: buttons
                .iter()
                .map(|(id, label)| Button {
                    id: id.to_string(),
                    label: label.to_string(),
                })
                .collect(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Row::Slider { id, .. } | Row::Toggle { id, .. } | Row::Item { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// User interaction reported by a surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PopupAction {
    Slider { id: String, value: i32, released: bool },
    Toggle { id: String, active: bool },
    Button { id: String },
    /// List row click; `secondary` is the right-click / long-press variant.
    Item { id: String, key: String, secondary: bool },
    Close,
}

/// An action addressed to the popup of a given category.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceEvent {
    pub category: Category,
    pub action: PopupAction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slider_value_is_clamped() {
        let row = Row::slider("limit", "", "Charging Limit", 120, 50..=100).step(5);
        match row {
            Row::Slider { value, step, .. } => {
                assert_eq!(value, 100);
                assert_eq!(step, 5);
            }
            other => panic!("unexpected row {:?}", other),
        }
    }

    #[test]
    fn test_find_skips_non_interactive_rows() {
        let view = PopupView::new("Audio Control", "")
            .row(Row::info("", "volume", "not an id"))
            .row(Row::toggle("mute", "", "Mute", "", true));

        assert!(matches!(view.find("mute"), Some(Row::Toggle { active: true, .. })));
        assert!(view.find("volume").is_none());
    }

    #[test]
    fn test_progress_text() {
        match Row::progress("", "CPU", "", 0.426) {
            Row::Progress { text, .. } => assert_eq!(text, "43%"),
            other => panic!("unexpected row {:?}", other),
        }
    }

    #[test]
    fn test_view_serializes_with_row_kind() {
        let view = PopupView::new("t", "s").row(Row::Separator);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["rows"][0]["kind"], "separator");
    }
}
