//! Visualization of snapshot trajectories.
//!
//! [`SvgAnimation`] writes a self-contained animated SVG with one frame per
//! layer: the snapshot point in red and its nearest printed point in green,
//! on a fixed 150 x 150 mm plot with the origin at the bottom left.

use crate::geometry::PointF;
use crate::{CoordF, Error, Result};
use log::debug;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Renders a per-layer animation of snapshot and nearest points.
pub trait Renderer {
    /// Write one frame per layer to `path`.
    fn render_animation(&self, snapshots: &[PointF], nearest: &[PointF], path: &Path)
        -> Result<()>;

    /// File extension of the produced files, without the dot.
    fn extension(&self) -> &'static str;
}

/// Animated SVG renderer.
#[derive(Clone, Debug)]
pub struct SvgAnimation {
    /// Side length of the plotted area (mm).
    pub extent: CoordF,
    /// Time per frame (ms).
    pub frame_ms: u32,
    /// Marker radius (mm).
    pub marker_radius: CoordF,
}

impl Default for SvgAnimation {
    fn default() -> Self {
        Self {
            extent: 150.0,
            frame_ms: 15,
            marker_radius: 2.0,
        }
    }
}

impl SvgAnimation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the SVG document.
    pub fn to_svg(&self, snapshots: &[PointF], nearest: &[PointF]) -> Result<String> {
        if snapshots.len() != nearest.len() {
            return Err(Error::LengthMismatch {
                expected: snapshots.len(),
                actual: nearest.len(),
            });
        }
        let e = self.extent;
        let frames = snapshots.len().max(1);
        let duration_ms = frames as u64 * self.frame_ms as u64;

        let mut svg = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {e} {e}" width="600" height="600">"#
        );
        let _ = writeln!(
            svg,
            r#"  <rect x="0" y="0" width="{e}" height="{e}" fill="white" stroke="black" stroke-width="0.5"/>"#
        );
        self.write_marker(&mut svg, snapshots, "red", duration_ms);
        self.write_marker(&mut svg, nearest, "green", duration_ms);
        svg.push_str("</svg>\n");
        Ok(svg)
    }

    fn write_marker(&self, svg: &mut String, points: &[PointF], color: &str, duration_ms: u64) {
        let Some(first) = points.first() else {
            return;
        };
        let join = |f: &dyn Fn(&PointF) -> CoordF| {
            points
                .iter()
                .map(|p| format!("{:.3}", f(p)))
                .collect::<Vec<_>>()
                .join(";")
        };
        // SVG y grows downwards; the plot's y grows upwards.
        let flip = |y: CoordF| self.extent - y;
        let xs = join(&|p| p.x);
        let ys = join(&|p| flip(p.y));

        let _ = writeln!(
            svg,
            r#"  <circle cx="{:.3}" cy="{:.3}" r="{}" fill="{}">"#,
            first.x,
            flip(first.y),
            self.marker_radius,
            color
        );
        for (attr, values) in [("cx", xs), ("cy", ys)] {
            let _ = writeln!(
                svg,
                r#"    <animate attributeName="{attr}" values="{values}" dur="{duration_ms}ms" calcMode="discrete" repeatCount="indefinite"/>"#
            );
        }
        svg.push_str("  </circle>\n");
    }
}

impl Renderer for SvgAnimation {
    fn render_animation(
        &self,
        snapshots: &[PointF],
        nearest: &[PointF],
        path: &Path,
    ) -> Result<()> {
        let svg = self.to_svg(snapshots, nearest)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, svg)?;
        debug!("Wrote {} frame animation to {}", snapshots.len(), path.display());
        Ok(())
    }

    fn extension(&self) -> &'static str {
        "svg"
    }
}
