use std::time::{Duration, Instant};

use crate::{
    config::PanelConfig,
    geometry::{Point, Rect},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelButton {
    Previous,
    PlayPause,
    Next,
}

/// Where the control strip and its contents sit for a given viewport. The
/// host draws from it and the engine hit-tests against it, so both agree.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelLayout {
    pub strip: Rect,
    pub buttons: [(PanelButton, Rect); 3],
    pub title: Point,
    pub artist: Point,
    pub progress: Rect,
    pub scale: f32,
}

impl PanelLayout {
    /// Proportions of a 1080px square screen, scaled to `viewport`.
    pub fn for_viewport(viewport: Rect) -> Self {
        let scale = (viewport.width().min(viewport.height()) / 1080.0).max(0.1);
        let center_x = viewport.center().x;
        let bottom = viewport.max.y;

        let strip = Rect {
            min: Point::new(viewport.min.x, bottom - 280.0 * scale),
            max: Point::new(viewport.max.x, bottom),
        };

        let button = 88.0 * scale;
        let gap = 50.0 * scale;
        let row_y = bottom - 160.0 * scale;
        let step = button + gap;
        let buttons = [
            (
                PanelButton::Previous,
                Rect::from_center_size(Point::new(center_x - step, row_y), button, button),
            ),
            (
                PanelButton::PlayPause,
                Rect::from_center_size(Point::new(center_x, row_y), button, button),
            ),
            (
                PanelButton::Next,
                Rect::from_center_size(Point::new(center_x + step, row_y), button, button),
            ),
        ];

        Self {
            strip,
            buttons,
            title: Point::new(center_x, bottom - 95.0 * scale),
            artist: Point::new(center_x, bottom - 55.0 * scale),
            progress: Rect::from_center_size(
                Point::new(center_x, bottom - 23.0 * scale),
                400.0 * scale,
                4.0 * scale.max(0.5),
            ),
            scale,
        }
    }

    pub fn button_at(&self, p: Point) -> Option<PanelButton> {
        self.buttons
            .iter()
            .find(|(_, rect)| rect.contains(p))
            .map(|(button, _)| *button)
    }
}

/// Tap-to-reveal controls that hide themselves after a quiet period.
#[derive(Debug, Clone)]
pub struct PanelState {
    visible: bool,
    last_interaction: Option<Instant>,
    auto_hide: Duration,
    layout: PanelLayout,
}

impl PanelState {
    pub fn new(config: &PanelConfig, layout: PanelLayout) -> Self {
        Self {
            visible: false,
            last_interaction: None,
            auto_hide: config.auto_hide(),
            layout,
        }
    }

    pub fn reconfigure(&mut self, config: &PanelConfig) {
        self.auto_hide = config.auto_hide();
    }

    pub fn set_layout(&mut self, layout: PanelLayout) {
        self.layout = layout;
    }

    pub fn layout(&self) -> &PanelLayout {
        &self.layout
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_interaction = Some(now);
    }

    /// A tap on the record's label.
    pub fn toggle(&mut self, now: Instant) {
        self.visible = !self.visible;
        self.touch(now);
    }

    /// Returns true when this tick hid the panel.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.visible {
            return false;
        }
        let idle = self
            .last_interaction
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);
        if idle > self.auto_hide {
            self.visible = false;
            return true;
        }
        false
    }

    /// Buttons only respond while the panel is showing.
    pub fn button_at(&self, p: Point) -> Option<PanelButton> {
        if !self.visible {
            return None;
        }
        self.layout.button_at(p)
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn last_interaction(&self) -> Option<Instant> {
        self.last_interaction
    }
}
