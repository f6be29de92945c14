pub mod backend;
pub mod canvas;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod ir;
pub mod layout;
pub mod layout_dump;
pub mod mirror;
pub mod proxy;
pub mod render;
pub mod reorder;
pub mod search;
pub mod session;
pub mod storage;
pub mod sync;
pub mod theme;
pub mod viewport;

pub use canvas::StoryCanvas;
#[cfg(feature = "cli")]
pub use cli::run;
pub use config::{Config, load_config};
pub use error::{Error, Result};
pub use ir::{Edge, LayoutNode, ResolvedNode, StoryCategory, StoryRecord, StoryView, ViewKey};
pub use layout::compute_layout;
pub use render::{render_canvas_svg, render_mobile_svg};
