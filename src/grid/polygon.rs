//! 2D boundary polygon for grid resampling.
//!
//! Even-odd ray casting, matching the behavior of the path containment
//! test the resample volume is defined with. Vertices are (latitude,
//! longitude) pairs; the polygon is implicitly closed.

use serde::{Deserialize, Serialize};

/// A closed 2D polygon in (latitude, longitude) space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Polygon {
    vertices: Vec<(f64, f64)>,
}

impl Polygon {
    /// Build a polygon from its corner vertices.
    ///
    /// Fewer than 3 vertices yields a degenerate polygon that contains
    /// nothing.
    pub fn new(vertices: Vec<(f64, f64)>) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[(f64, f64)] {
        &self.vertices
    }

    /// Even-odd point-in-polygon test.
    ///
    /// Points exactly on an edge are implementation-defined (the grid is
    /// far denser than any sane boundary, so edge nodes are noise either
    /// way).
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        if self.vertices.len() < 3 {
            return false;
        }
        let mut inside = false;
        let n = self.vertices.len();
        let mut j = n - 1;
        for i in 0..n {
            let (lat_i, lon_i) = self.vertices[i];
            let (lat_j, lon_j) = self.vertices[j];
            if ((lon_i > longitude) != (lon_j > longitude))
                && (latitude
                    < (lat_j - lat_i) * (longitude - lon_i) / (lon_j - lon_i) + lat_i)
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}
