pub mod styles;

use std::path::Path;

use image::RgbImage;
use image::imageops::FilterType;

use crate::config::RenderConfig;
use crate::state::Style;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanelOptions {
    pub width: u32,
    pub height: u32,
    pub contrast: f32,
    pub saturation: f32,
}

impl From<&RenderConfig> for PanelOptions {
    fn from(cfg: &RenderConfig) -> Self {
        Self {
            width: cfg.panel_width,
            height: cfg.panel_height,
            contrast: cfg.contrast,
            saturation: cfg.saturation,
        }
    }
}

/// Loads a cached photo, crops it to fill the panel, and applies `style`.
pub fn prepare_for_panel(
    source: &Path,
    style: Style,
    panel: PanelOptions,
) -> Result<RgbImage, image::ImageError> {
    let img = image::open(source)?;
    let fitted = img
        .resize_to_fill(panel.width, panel.height, FilterType::Lanczos3)
        .to_rgb8();
    Ok(styles::apply(fitted, style, &panel))
}
