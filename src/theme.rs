use serde::{Deserialize, Serialize};

use crate::ir::StoryCategory;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryColors {
    pub fill: String,
    pub border: String,
    pub badge: String,
}

impl CategoryColors {
    fn new(fill: &str, border: &str, badge: &str) -> Self {
        Self {
            fill: fill.to_string(),
            border: border.to_string(),
            badge: badge.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Theme {
    pub font_family: String,
    pub font_size: f32,
    pub background: String,
    pub text_color: String,
    pub muted_text_color: String,
    pub edge_color: String,
    pub edge_width: f32,
    pub highlight_color: String,
    pub watched_color: String,
    pub watched_opacity: f32,
    pub placeholder_fill: String,
    pub divider_color: String,
    pub main: CategoryColors,
    pub theme: CategoryColors,
    pub side: CategoryColors,
    pub eternal: CategoryColors,
    pub annotation: CategoryColors,
}

impl Theme {
    pub fn night() -> Self {
        Self {
            font_family: "Pretendard, Inter, system-ui, sans-serif".to_string(),
            font_size: 14.0,
            background: "#0F172A".to_string(),
            text_color: "#F8FAFC".to_string(),
            muted_text_color: "#94A3B8".to_string(),
            edge_color: "#CBD5E1".to_string(),
            edge_width: 6.0,
            highlight_color: "#6366F1".to_string(),
            watched_color: "#22C55E".to_string(),
            watched_opacity: 0.45,
            placeholder_fill: "#1E293B".to_string(),
            divider_color: "rgba(255,255,255,0.3)".to_string(),
            main: CategoryColors::new("rgba(30,41,59,0.8)", "#334155", "#1E293B"),
            theme: CategoryColors::new("rgba(30,41,59,0.8)", "#475569", "#312E81"),
            side: CategoryColors::new("rgba(30,41,59,0.8)", "#334155", "#0F766E"),
            eternal: CategoryColors::new("rgba(49,46,129,0.6)", "#818CF8", "#4338CA"),
            annotation: CategoryColors::new("rgba(245,158,11,0.2)", "#F59E0B", "#B45309"),
        }
    }

    pub fn paper() -> Self {
        Self {
            font_family: "Inter, Segoe UI, system-ui, -apple-system, sans-serif".to_string(),
            font_size: 13.0,
            background: "#FFFFFF".to_string(),
            text_color: "#1C2430".to_string(),
            muted_text_color: "#64748B".to_string(),
            edge_color: "#7A8AA6".to_string(),
            edge_width: 3.0,
            highlight_color: "#4F46E5".to_string(),
            watched_color: "#16A34A".to_string(),
            watched_opacity: 0.5,
            placeholder_fill: "#EEF2F8".to_string(),
            divider_color: "#D7E0F0".to_string(),
            main: CategoryColors::new("#F8FAFF", "#C7D2E5", "#E0E7FF"),
            theme: CategoryColors::new("#F7FAFF", "#A5B4FC", "#EEF2FF"),
            side: CategoryColors::new("#FFFFFF", "#D7E0F0", "#CCFBF1"),
            eternal: CategoryColors::new("#EEF2FF", "#818CF8", "#C7D2FE"),
            annotation: CategoryColors::new("#FFFBEB", "#F59E0B", "#FDE68A"),
        }
    }

    pub fn colors_for(&self, category: StoryCategory) -> &CategoryColors {
        match category {
            StoryCategory::Main => &self.main,
            StoryCategory::Theme | StoryCategory::ThemeX | StoryCategory::ThemeNow => &self.theme,
            StoryCategory::Etc => &self.side,
            StoryCategory::Eternal => &self.eternal,
            StoryCategory::Annotation => &self.annotation,
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::night()
    }
}
