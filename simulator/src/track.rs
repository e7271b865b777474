use std::error::Error;
use std::path::Path;

use prelude::*;

/// Closed loop of centreline points.
pub struct Track {
    xs: Vec<float>,
    ys: Vec<float>,
}

impl Track {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Track, Box<dyn Error>> {
        let (mut xs, mut ys) = (Vec::new(), Vec::new());
        let mut reader = csv::Reader::from_path(path)?;
        for row in reader.deserialize() {
            let (x, y): (float, float) = row?;
            xs.push(x);
            ys.push(y);
        }
        Ok(Track::from_points(xs, ys)?)
    }

    pub fn from_points(xs: Vec<float>, ys: Vec<float>) -> Result<Track, String> {
        if xs.len() != ys.len() {
            return Err(format!("track has {} xs but {} ys", xs.len(), ys.len()));
        }
        if xs.len() < 2 {
            return Err(format!("track needs at least two points, got {}", xs.len()));
        }
        Ok(Track { xs, ys })
    }

    pub fn len(&self) -> usize {
        self.xs.len()
    }

    pub fn point(&self, i: usize) -> (float, float) {
        let i = i % self.len();
        (self.xs[i], self.ys[i])
    }

    /// Pose at the first point, facing the second.
    pub fn start_pose(&self) -> (float, float, float) {
        let (x0, y0) = self.point(0);
        let (x1, y1) = self.point(1);
        (x0, y0, float::atan2(y1 - y0, x1 - x0))
    }

    pub fn nearest(&self, x: float, y: float) -> usize {
        let mut best = (0, INFINITY);
        for i in 0..self.len() {
            let d = float::hypot(self.xs[i] - x, self.ys[i] - y);
            if d < best.1 {
                best = (i, d);
            }
        }
        best.0
    }

    /// Distance from the nearest centreline segment.
    pub fn distance(&self, x: float, y: float) -> float {
        let i = self.nearest(x, y);
        let n = self.len();
        [(i + n - 1) % n, i]
            .iter()
            .map(|&a| segment_distance(self.point(a), self.point(a + 1), (x, y)))
            .fold(INFINITY, min)
    }

    /// The `n` points following the one nearest to `(x, y)`, starting with the nearest.
    pub fn waypoints(&self, x: float, y: float, n: usize) -> (Vec<float>, Vec<float>) {
        let start = self.nearest(x, y);
        (start..start + n).map(|i| self.point(i)).unzip()
    }
}

fn segment_distance(a: (float, float), b: (float, float), p: (float, float)) -> float {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let s = if len_sq > 0.0 {
        clamp(((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len_sq, 0.0, 1.0)
    } else {
        0.0
    };
    float::hypot(p.0 - (a.0 + s * dx), p.1 - (a.1 + s * dy))
}
