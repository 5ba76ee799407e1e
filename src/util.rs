use std::cmp::Ordering;

use float_ord::FloatOrd;
use geo::{
    Area, BoundingRect, Coord, EuclideanLength, Line, LineString, MinimumRotatedRect, Polygon,
};
use tracing::instrument;

use crate::{Point, Quad};

pub(crate) fn to_geo_poly(points: &[Point]) -> Polygon<f32> {
    Polygon::new(LineString::new(points.to_vec()), vec![])
}

pub(crate) fn distance(a: Point, b: Point) -> f32 {
    Line::new(a, b).euclidean_length()
}

/// Winding sum over the quad edges. Positive for top-left, top-right,
/// bottom-right, bottom-left order in image coordinates (y pointing down).
pub fn signed_area(quad: &Quad) -> f32 {
    (0..4)
        .map(|i| {
            let from = quad[(i + 3) % 4];
            let to = quad[i];
            -0.5 * (to.y + from.y) * (to.x - from.x)
        })
        .sum()
}

/// Reduces a polygon to four corners.
///
/// Quads pass through unchanged. Longer polygons are replaced by their
/// minimum-area rotated rectangle, whose corners are rotated so the first one
/// best matches the polygon's start, the two points around its middle, and its
/// end. Returns `None` for fewer than four points or a degenerate polygon.
#[instrument(level = "trace", skip(points), fields(len = points.len()))]
pub fn quad_from_polygon(points: &[Point]) -> Option<Quad> {
    match points.len() {
        0..=3 => return None,
        4 => return Some([points[0], points[1], points[2], points[3]]),
        _ => {}
    }

    let pixels = points
        .iter()
        .map(|p| Coord {
            x: p.x.trunc(),
            y: p.y.trunc(),
        })
        .collect::<Vec<_>>();
    let rect = to_geo_poly(&pixels).minimum_rotated_rect()?;
    let corners = rect.exterior().0.as_slice();
    if corners.len() < 4 {
        return None;
    }
    let mut corners = [corners[0], corners[1], corners[2], corners[3]];
    if signed_area(&corners) < 0.0 {
        corners.swap(1, 3);
    }

    let n = points.len();
    let anchors = [points[0], points[n / 2 - 1], points[n / 2], points[n - 1]];
    let (start, _) = (0..4)
        .map(|i| {
            let cost = anchors
                .iter()
                .enumerate()
                .map(|(k, anchor)| distance(corners[(i + k) % 4], *anchor))
                .sum::<f32>();
            (i, cost)
        })
        .min_by_key(|(_, cost)| FloatOrd(*cost))?;
    log::trace!("Min area quad starts at corner {start}");

    Some(std::array::from_fn(|k| {
        let c = corners[(start + k) % 4];
        Coord {
            x: c.x.round(),
            y: c.y.round(),
        }
    }))
}

/// Grows a top-left, top-right, bottom-right, bottom-left quad by `pad`
/// pixels on every side, clamped to the image.
pub fn pad_quad(quad: &Quad, width: u32, height: u32, pad: u32) -> Quad {
    let pad = pad as f32;
    let offsets = [(-pad, -pad), (pad, -pad), (pad, pad), (-pad, pad)];
    std::array::from_fn(|i| {
        let (dx, dy) = offsets[i];
        Coord {
            x: (quad[i].x.trunc() + dx).clamp(0.0, width as f32),
            y: (quad[i].y.trunc() + dy).clamp(0.0, height as f32),
        }
    })
}

/// Center of the bounding box and absolute area of a polygon.
pub fn polygon_center_and_area(points: &[Point]) -> Option<(f32, f32, f32)> {
    if points.len() < 3 {
        return None;
    }
    let poly = to_geo_poly(points);
    let center = poly.bounding_rect()?.center();
    Some((center.x, center.y, poly.unsigned_area()))
}

enum Chunk<'a> {
    Text(&'a str),
    Number(&'a str),
}

/// Alternating text and digit runs, always starting and ending with a
/// (possibly empty) text run.
fn chunks(s: &str) -> Vec<Chunk<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_number = false;
    for (i, c) in s.char_indices() {
        let digit = c.is_ascii_digit();
        if digit != in_number {
            let run = &s[start..i];
            out.push(if in_number {
                Chunk::Number(run)
            } else {
                Chunk::Text(run)
            });
            start = i;
            in_number = digit;
        }
    }
    if in_number {
        out.push(Chunk::Number(&s[start..]));
        out.push(Chunk::Text(""));
    } else {
        out.push(Chunk::Text(&s[start..]));
    }
    out
}

fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Compares strings so that embedded numbers sort by value: `img2` < `img10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (a, b) = (chunks(a), chunks(b));
    for (x, y) in a.iter().zip(&b) {
        let ord = match (x, y) {
            (Chunk::Number(x), Chunk::Number(y)) => cmp_digits(x, y),
            (Chunk::Text(x), Chunk::Text(y)) => x.cmp(y),
            (Chunk::Number(_), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Number(_)) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Sorts `items` in natural alphanumeric order of `key`.
pub fn natural_sort<T, K: AsRef<str>>(items: &mut [T], key: impl Fn(&T) -> K) {
    items.sort_by(|a, b| natural_cmp(key(a).as_ref(), key(b).as_ref()));
}
