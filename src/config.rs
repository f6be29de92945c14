use crate::theme::Theme;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub slot_unit: f32,
    pub row_height: f32,
    pub row_gap: f32,
    /// Stored x at or beyond this lands in the right column.
    pub column_split: f32,
    /// Mobile x written for the right column when a node is dropped there.
    pub right_column_x: f32,
    /// Share of the container width where a drop switches to the right column.
    pub drop_column_ratio: f32,
    pub trailing_rows: u32,
    pub trailing_padding: f32,
    pub empty_height: f32,
    pub empty_max_row: u32,
    pub scroll_margin: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            slot_unit: 80.0,
            row_height: 70.0,
            row_gap: 6.0,
            column_split: 200.0,
            right_column_x: 400.0,
            drop_column_ratio: 0.6,
            trailing_rows: 10,
            trailing_padding: 400.0,
            empty_height: 1000.0,
            empty_max_row: 10,
            scroll_margin: 150.0,
        }
    }
}

impl GridConfig {
    pub fn row_pitch(&self) -> f32 {
        self.row_height + self.row_gap
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub grid: GridConfig,
    pub snap_grid: f32,
    pub nudge_step: f32,
    pub nudge_step_large: f32,
    /// Width given to `etc` nodes whose artwork size is known.
    pub etc_base_width: f32,
    pub label_line_height: f32,
    pub max_label_width_chars: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            snap_grid: 20.0,
            nudge_step: 1.0,
            nudge_step_large: 10.0,
            etc_base_width: 320.0,
            label_line_height: 1.5,
            max_label_width_chars: 18,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewportConfig {
    /// Internal zoom that reads as 100% to the viewer.
    pub zoom_scale: f32,
    pub min_display_zoom: f32,
    pub max_display_zoom: f32,
    pub wheel_speed: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    /// World units added to the vertical centre so nodes sit slightly high.
    pub vertical_bias: f32,
    pub initial_anchor_ratio: f32,
    pub focus_ms: u64,
    pub reset_ms: u64,
    pub initial_ms: u64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            zoom_scale: 0.55,
            min_display_zoom: 0.6,
            max_display_zoom: 1.5,
            wheel_speed: 1.5,
            pad_x: 1500.0,
            pad_y: 1000.0,
            vertical_bias: 60.0,
            initial_anchor_ratio: 1.0 / 3.0,
            focus_ms: 700,
            reset_ms: 800,
            initial_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { debounce_ms: 2000 }
    }
}

impl SyncConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
    pub layouts_table: String,
    pub masters_table: String,
    pub settings_table: String,
    pub updates_table: String,
    pub bucket: String,
    pub upload_folder: String,
    pub proxy_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            layouts_table: "story_layouts".to_string(),
            masters_table: "master_stories".to_string(),
            settings_table: "admin_settings".to_string(),
            updates_table: "app_updates".to_string(),
            bucket: "story-images".to_string(),
            upload_folder: "nodes".to_string(),
            proxy_url: None,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    pub width: f32,
    pub height: f32,
    pub background: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1600.0,
            height: 900.0,
            background: "#0F172A".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub theme: Theme,
    pub layout: LayoutConfig,
    pub viewport: ViewportConfig,
    pub sync: SyncConfig,
    pub backend: BackendConfig,
    pub render: RenderConfig,
}

impl Default for Config {
    fn default() -> Self {
        let theme = Theme::night();
        let render = RenderConfig {
            background: theme.background.clone(),
            ..Default::default()
        };
        Self {
            theme,
            layout: LayoutConfig::default(),
            viewport: ViewportConfig::default(),
            sync: SyncConfig::default(),
            backend: BackendConfig::default(),
            render,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    theme: Option<String>,
    theme_variables: Option<ThemeVariables>,
    backend: Option<BackendConfigFile>,
    grid: Option<GridConfigFile>,
    viewport: Option<ViewportConfigFile>,
    debounce_ms: Option<u64>,
    snap_grid: Option<f32>,
    width: Option<f32>,
    height: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThemeVariables {
    font_family: Option<String>,
    font_size: Option<f32>,
    background: Option<String>,
    text_color: Option<String>,
    edge_color: Option<String>,
    highlight_color: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackendConfigFile {
    url: Option<String>,
    anon_key: Option<String>,
    layouts_table: Option<String>,
    masters_table: Option<String>,
    bucket: Option<String>,
    proxy_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GridConfigFile {
    slot_unit: Option<f32>,
    row_height: Option<f32>,
    row_gap: Option<f32>,
    column_split: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViewportConfigFile {
    zoom_scale: Option<f32>,
    min_display_zoom: Option<f32>,
    max_display_zoom: Option<f32>,
    wheel_speed: Option<f32>,
}

pub const ENV_URL: &str = "STORY_GUIDE_URL";
pub const ENV_ANON_KEY: &str = "STORY_GUIDE_ANON_KEY";
pub const ENV_PROXY_URL: &str = "STORY_GUIDE_PROXY_URL";

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = Config::default();
    if let Some(path) = path {
        let contents = std::fs::read_to_string(path)?;
        let parsed: ConfigFile = json5::from_str(&contents)?;
        apply_config_file(&mut config, parsed);
    }
    apply_env(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_config_file(config: &mut Config, parsed: ConfigFile) {
    if let Some(theme_name) = parsed.theme.as_deref() {
        if theme_name == "paper" || theme_name == "light" {
            config.theme = Theme::paper();
        } else if theme_name == "night" || theme_name == "default" {
            config.theme = Theme::night();
        }
        config.render.background = config.theme.background.clone();
    }

    if let Some(vars) = parsed.theme_variables {
        if let Some(v) = vars.font_family {
            config.theme.font_family = v;
        }
        if let Some(v) = vars.font_size {
            config.theme.font_size = v;
        }
        if let Some(v) = vars.background {
            config.theme.background = v.clone();
            config.render.background = v;
        }
        if let Some(v) = vars.text_color {
            config.theme.text_color = v;
        }
        if let Some(v) = vars.edge_color {
            config.theme.edge_color = v;
        }
        if let Some(v) = vars.highlight_color {
            config.theme.highlight_color = v;
        }
    }

    if let Some(backend) = parsed.backend {
        if backend.url.is_some() {
            config.backend.url = backend.url;
        }
        if backend.anon_key.is_some() {
            config.backend.anon_key = backend.anon_key;
        }
        if let Some(v) = backend.layouts_table {
            config.backend.layouts_table = v;
        }
        if let Some(v) = backend.masters_table {
            config.backend.masters_table = v;
        }
        if let Some(v) = backend.bucket {
            config.backend.bucket = v;
        }
        if backend.proxy_url.is_some() {
            config.backend.proxy_url = backend.proxy_url;
        }
        if backend.timeout_secs.is_some() {
            config.backend.timeout_secs = backend.timeout_secs;
        }
    }

    if let Some(grid) = parsed.grid {
        if let Some(v) = grid.slot_unit {
            config.layout.grid.slot_unit = v;
        }
        if let Some(v) = grid.row_height {
            config.layout.grid.row_height = v;
        }
        if let Some(v) = grid.row_gap {
            config.layout.grid.row_gap = v;
        }
        if let Some(v) = grid.column_split {
            config.layout.grid.column_split = v;
        }
    }

    if let Some(viewport) = parsed.viewport {
        if let Some(v) = viewport.zoom_scale {
            config.viewport.zoom_scale = v;
        }
        if let Some(v) = viewport.min_display_zoom {
            config.viewport.min_display_zoom = v;
        }
        if let Some(v) = viewport.max_display_zoom {
            config.viewport.max_display_zoom = v;
        }
        if let Some(v) = viewport.wheel_speed {
            config.viewport.wheel_speed = v;
        }
    }

    if let Some(v) = parsed.debounce_ms {
        config.sync.debounce_ms = v;
    }
    if let Some(v) = parsed.snap_grid {
        config.layout.snap_grid = v;
    }
    if let Some(v) = parsed.width {
        config.render.width = v;
    }
    if let Some(v) = parsed.height {
        config.render.height = v;
    }
}

fn apply_env(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup(ENV_URL).filter(|v| !v.is_empty()) {
        config.backend.url = Some(url);
    }
    if let Some(key) = lookup(ENV_ANON_KEY).filter(|v| !v.is_empty()) {
        config.backend.anon_key = Some(key);
    }
    if let Some(proxy) = lookup(ENV_PROXY_URL).filter(|v| !v.is_empty()) {
        config.backend.proxy_url = Some(proxy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_overrides_defaults() {
        let raw = r#"{
            // comments are fine, the file is json5
            theme: "paper",
            backend: { url: "https://abc.example.co", bucket: "art" },
            grid: { slotUnit: 100 },
            debounceMs: 500,
        }"#;
        let parsed: ConfigFile = json5::from_str(raw).unwrap();
        let mut config = Config::default();
        apply_config_file(&mut config, parsed);
        assert_eq!(config.theme.background, Theme::paper().background);
        assert_eq!(config.backend.url.as_deref(), Some("https://abc.example.co"));
        assert_eq!(config.backend.bucket, "art");
        assert_eq!(config.backend.layouts_table, "story_layouts");
        assert_eq!(config.layout.grid.slot_unit, 100.0);
        assert_eq!(config.layout.grid.row_height, 70.0);
        assert_eq!(config.sync.debounce_ms, 500);
    }

    #[test]
    fn env_wins_over_file() {
        let mut config = Config::default();
        config.backend.url = Some("https://file.example.co".to_string());
        apply_env(&mut config, |key| match key {
            ENV_URL => Some("https://env.example.co".to_string()),
            ENV_PROXY_URL => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.backend.url.as_deref(), Some("https://env.example.co"));
        assert_eq!(config.backend.proxy_url, None);
    }
}
