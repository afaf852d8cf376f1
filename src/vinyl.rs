use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use anyhow::Context;
use eframe::egui::{Color32, ColorImage, Vec2};

use crate::config::VinylConfig;

const DISC_COLOR: Color32 = Color32::from_rgb(20, 20, 22);
const BLANK_LABEL_COLOR: Color32 = Color32::from_rgb(178, 40, 36);

#[derive(Debug, Clone, PartialEq)]
pub struct RecordArtOptions {
    pub size: usize,
    pub label_ratio: f32,
    pub groove_spacing: f32,
}

impl RecordArtOptions {
    pub fn from_config(config: &VinylConfig) -> Self {
        Self {
            size: config.texture_size(),
            label_ratio: config.label_ratio(),
            groove_spacing: config.groove_spacing_px(),
        }
    }
}

/// Finished record faces by track id. Oldest entries fall out once `limit`
/// tracks have been seen.
pub struct VinylCache {
    entries: HashMap<Arc<str>, Arc<ColorImage>>,
    order: VecDeque<Arc<str>>,
    limit: usize,
}

impl Default for VinylCache {
    fn default() -> Self {
        Self::with_limit(16)
    }
}

impl VinylCache {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    pub fn get(&self, track_id: &str) -> Option<Arc<ColorImage>> {
        self.entries.get(track_id).cloned()
    }

    pub fn insert(&mut self, track_id: Arc<str>, image: ColorImage) -> Arc<ColorImage> {
        let image = Arc::new(image);
        if self
            .entries
            .insert(Arc::clone(&track_id), Arc::clone(&image))
            .is_none()
        {
            self.order.push_back(track_id);
        }
        while self.order.len() > self.limit {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
        image
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

pub fn decode_artwork(bytes: &[u8]) -> anyhow::Result<ColorImage> {
    let image = image::load_from_memory(bytes)
        .context("Failed to decode album artwork")?
        .to_rgba8();
    let size = [image.width() as usize, image.height() as usize];
    Ok(ColorImage::from_rgba_unmultiplied(size, image.as_raw()))
}

/// Paints a record face: dark grooved vinyl, a label showing `art` cropped
/// to a circle (or a plain label without art), a bright ring where the two
/// meet and a see-through spindle hole.
pub fn render_record(art: Option<&ColorImage>, options: &RecordArtOptions) -> ColorImage {
    let size = options.size.max(2);
    let mut output = ColorImage::new([size, size], vec![Color32::TRANSPARENT; size * size]);

    let radius_px = size as f32 / 2.0;
    let inv_radius = 1.0 / radius_px;
    let label_ratio = options.label_ratio.clamp(0.1, 0.6);
    let groove_spacing = options.groove_spacing.max(2.0);
    let groove_half_width = 0.6;
    let label_ring_width = 0.012;
    let edge_shadow_start = 0.9;
    let sheen_angle = -0.4..=0.3;
    let hole_ratio = (size as f32 / 120.0).clamp(3.0, 9.0) / radius_px;

    let art_geometry = art.filter(|image| image.size[0] > 0 && image.size[1] > 0).map(|image| {
        let width = image.size[0] as f32;
        let height = image.size[1] as f32;
        (image, Vec2::new(width / 2.0, height / 2.0), width.min(height) / 2.0)
    });

    for y in 0..size {
        for x in 0..size {
            let dx = (x as f32 + 0.5 - radius_px) * inv_radius;
            let dy = (y as f32 + 0.5 - radius_px) * inv_radius;
            let r = (dx * dx + dy * dy).sqrt();

            if r >= 1.0 || r <= hole_ratio {
                continue;
            }

            let mut color = if r <= label_ratio {
                let label = match art_geometry {
                    Some((image, center, src_radius)) => sample_bilinear(
                        image,
                        center.x + dx / label_ratio * src_radius,
                        center.y + dy / label_ratio * src_radius,
                    ),
                    None => BLANK_LABEL_COLOR,
                };
                lighten(label, (label_ratio - r) / label_ratio * 0.06)
            } else {
                let from_label = (r - label_ratio) * radius_px;
                let phase = from_label.rem_euclid(groove_spacing);
                let groove_dist = phase.min(groove_spacing - phase);
                let mut color = DISC_COLOR;
                if groove_dist < groove_half_width {
                    color = lighten(color, (1.0 - groove_dist / groove_half_width) * 0.1);
                }

                let angle = dy.atan2(dx);
                if sheen_angle.contains(&angle) {
                    let t = (angle - sheen_angle.start()) / (sheen_angle.end() - sheen_angle.start());
                    color = lighten(color, (1.0 - t).powf(2.0) * 0.12);
                }
                color
            };

            let ring_delta = (r - label_ratio).abs();
            if ring_delta < label_ring_width {
                color = lighten(color, (1.0 - ring_delta / label_ring_width) * 0.35);
            }

            if r > edge_shadow_start {
                let t = (r - edge_shadow_start) / (1.0 - edge_shadow_start);
                color = darken(color, t * 0.4);
            }

            let alpha = if r > 0.995 {
                (((1.0 - r) / 0.005).clamp(0.0, 1.0) * 255.0) as u8
            } else {
                255
            };

            output.pixels[y * size + x] =
                Color32::from_rgba_unmultiplied(color.r(), color.g(), color.b(), alpha);
        }
    }

    output
}

fn sample_bilinear(image: &ColorImage, x: f32, y: f32) -> Color32 {
    let width = image.size[0];
    let height = image.size[1];
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let pixel = |px: usize, py: usize| image.pixels[py * width + px];

    let top = lerp_color(pixel(x0, y0), pixel(x1, y0), x - x0 as f32);
    let bottom = lerp_color(pixel(x0, y1), pixel(x1, y1), x - x0 as f32);
    lerp_color(top, bottom, y - y0 as f32)
}

fn lerp_color(a: Color32, b: Color32, t: f32) -> Color32 {
    let t = t.clamp(0.0, 1.0);
    let mix = |from: u8, to: u8| (from as f32 + (to as f32 - from as f32) * t).round() as u8;
    Color32::from_rgba_unmultiplied(
        mix(a.r(), b.r()),
        mix(a.g(), b.g()),
        mix(a.b(), b.b()),
        mix(a.a(), b.a()),
    )
}

fn map_channels(color: Color32, f: impl Fn(f32) -> f32) -> Color32 {
    let channel = |c: u8| f(c as f32).round().clamp(0.0, 255.0) as u8;
    Color32::from_rgba_unmultiplied(
        channel(color.r()),
        channel(color.g()),
        channel(color.b()),
        color.a(),
    )
}

fn darken(color: Color32, amount: f32) -> Color32 {
    let amount = amount.clamp(0.0, 1.0);
    map_channels(color, |c| c * (1.0 - amount))
}

fn lighten(color: Color32, amount: f32) -> Color32 {
    let amount = amount.clamp(0.0, 1.0);
    map_channels(color, |c| c + (255.0 - c) * amount)
}
