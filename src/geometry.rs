#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: Point,
    pub max: Point,
}

impl Rect {
    pub fn from_center_size(center: Point, width: f32, height: f32) -> Self {
        Self {
            min: Point::new(center.x - width / 2.0, center.y - height / 2.0),
            max: Point::new(center.x + width / 2.0, center.y + height / 2.0),
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        (self.min.x..=self.max.x).contains(&p.x) && (self.min.y..=self.max.y).contains(&p.y)
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
        )
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }
}

/// The record on screen: outer edge and the center label that acts as the
/// panel toggle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Disc {
    pub center: Point,
    pub radius: f32,
    pub label_radius: f32,
}

impl Disc {
    /// The record hangs slightly past the edges of the view so its rim never
    /// shows corners while rotating.
    pub fn for_viewport(viewport: Rect, label_ratio: f32) -> Self {
        let radius = viewport.width().min(viewport.height()) * 0.55;
        Self {
            center: viewport.center(),
            radius,
            label_radius: radius * label_ratio,
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        self.center.distance(p) <= self.radius
    }

    pub fn label_contains(&self, p: Point) -> bool {
        self.center.distance(p) <= self.label_radius
    }

    /// Pointer angle around the center in degrees, clockwise from +x with
    /// y pointing down.
    pub fn pointer_angle(&self, p: Point) -> f64 {
        let dy = f64::from(p.y - self.center.y);
        let dx = f64::from(p.x - self.center.x);
        dy.atan2(dx).to_degrees()
    }
}

impl Default for Disc {
    fn default() -> Self {
        Self {
            center: Point::new(540.0, 540.0),
            radius: 540.0,
            label_radius: 150.0,
        }
    }
}
