// ============================================================================
// STROKES: anti-aliased round-joined polylines via segment distance fields
// ============================================================================

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::fill_coverage;

/// Distance from (px,py) to segment a→b. Degenerate segments act as points.
fn sdf_line_segment(px: f32, py: f32, ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let dx = bx - ax;
    let dy = by - ay;
    let len2 = dx * dx + dy * dy;
    let t = if len2 > 0.0 {
        (((px - ax) * dx + (py - ay) * dy) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let cx = ax + t * dx;
    let cy = ay + t * dy;
    ((px - cx) * (px - cx) + (py - cy) * (py - cy)).sqrt()
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Coverage of a polyline of the given width over its padded bounding box.
/// Returns `(coverage, mask_w, mask_h, off_x, off_y)`.
pub fn polyline_coverage(points: &[(f32, f32)], width: f32) -> Option<(Vec<f32>, u32, u32, i64, i64)> {
    if points.len() < 2 || width <= 0.0 {
        return None;
    }
    let r = width * 0.5;
    let pad = r + 1.0;
    let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
    let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
    for &(x, y) in points {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    let off_x = (min_x - pad).floor() as i64;
    let off_y = (min_y - pad).floor() as i64;
    let mask_w = ((max_x + pad).ceil() as i64 - off_x).max(1) as u32;
    let mask_h = ((max_y + pad).ceil() as i64 - off_y).max(1) as u32;

    let mut coverage = vec![0.0f32; (mask_w * mask_h) as usize];
    coverage
        .par_chunks_mut(mask_w as usize)
        .enumerate()
        .for_each(|(row, out)| {
            let py = off_y as f32 + row as f32 + 0.5;
            for (col, cov) in out.iter_mut().enumerate() {
                let px = off_x as f32 + col as f32 + 0.5;
                let mut best = f32::MAX;
                for seg in points.windows(2) {
                    let (a, b) = (seg[0], seg[1]);
                    best = best.min(sdf_line_segment(px, py, a.0, a.1, b.0, b.1));
                }
                *cov = smoothstep(r + 0.5, r - 0.5, best);
            }
        });
    Some((coverage, mask_w, mask_h, off_x, off_y))
}

/// Draw a connected round-capped, round-joined line. Fewer than two points
/// draws nothing.
pub fn stroke_polyline(dst: &mut RgbaImage, points: &[(f32, f32)], width: f32, color: Rgba<u8>, opacity: f32) {
    if let Some((coverage, mask_w, _, off_x, off_y)) = polyline_coverage(points, width) {
        fill_coverage(dst, &coverage, mask_w, off_x, off_y, color, opacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    #[test]
    fn single_point_draws_nothing() {
        let mut img = RgbaImage::from_pixel(10, 10, BLACK);
        stroke_polyline(&mut img, &[(5.0, 5.0)], 4.0, RED, 1.0);
        assert!(img.pixels().all(|p| *p == BLACK));
    }

    #[test]
    fn horizontal_line_covers_its_path() {
        let mut img = RgbaImage::from_pixel(20, 10, BLACK);
        stroke_polyline(&mut img, &[(2.0, 5.0), (18.0, 5.0)], 4.0, RED, 1.0);
        assert_eq!(*img.get_pixel(10, 5), RED);
        assert_eq!(*img.get_pixel(10, 0), BLACK);
        assert_eq!(*img.get_pixel(10, 9), BLACK);
    }

    #[test]
    fn joins_are_round() {
        let (cov, w, _, ox, oy) = polyline_coverage(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)], 4.0).unwrap();
        // The outer corner point just beyond the join, within radius, is covered.
        let (x, y) = (11.0 - ox as f32, -1.0 - oy as f32);
        let idx = (y as u32 * w + x as u32) as usize;
        assert!(cov[idx] > 0.5);
    }

    #[test]
    fn strokes_clip_to_image() {
        let mut img = RgbaImage::from_pixel(4, 4, BLACK);
        stroke_polyline(&mut img, &[(-10.0, -10.0), (10.0, 10.0)], 2.0, RED, 1.0);
        assert!(img.get_pixel(2, 2)[0] > 0);
    }
}
