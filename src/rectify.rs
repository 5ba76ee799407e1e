use image::{DynamicImage, ImageBuffer, Pixel};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use tracing::instrument;

use crate::{
    util::{distance, pad_quad, signed_area},
    CropOptions, Quad, RectifyError,
};

/// Catmull-Rom coefficient, the same kernel OpenCV uses for cubic resampling.
const CUBIC_A: f64 = -0.5;

/// Longest crop side accepted, the same limit OpenCV's remap has.
const MAX_TARGET_SIDE: f32 = i16::MAX as f32;

/// Crops the region enclosed by `quad` out of `image` and straightens it.
pub fn rectify(image: &DynamicImage, quad: &Quad) -> Result<DynamicImage, RectifyError> {
    rectify_with(image, quad, &CropOptions::default())
}

/// Like [`rectify`], with explicit padding and orientation handling.
///
/// The quad is expected in top-left, top-right, bottom-right, bottom-left
/// order; counter-clockwise input is detected from its winding and reordered.
/// The crop is as wide as the longer of the top and bottom edges and as tall
/// as the longer of the left and right edges. Tall crops are turned 90°
/// counter-clockwise so the text runs horizontally.
#[instrument(
    level = "debug",
    skip(image, options),
    fields(width = image.width(), height = image.height())
)]
pub fn rectify_with(
    image: &DynamicImage,
    quad: &Quad,
    options: &CropOptions,
) -> Result<DynamicImage, RectifyError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(RectifyError::EmptyImage);
    }

    let mut points = *quad;
    if options.padding > 0 {
        points = pad_quad(&points, image.width(), image.height(), options.padding);
    }
    validate(&points)?;

    if signed_area(&points) < 0.0 {
        log::trace!("Quad is counter-clockwise, swapping corners 1 and 3");
        points.swap(1, 3);
    }

    let width = distance(points[0], points[1]).max(distance(points[2], points[3]));
    let height = distance(points[0], points[3]).max(distance(points[1], points[2]));
    // NaN fails both comparisons
    if !(width <= MAX_TARGET_SIDE && height <= MAX_TARGET_SIDE) {
        return Err(RectifyError::TargetTooLarge { width, height });
    }
    let (width, height) = (width as u32, height as u32);
    if width == 0 || height == 0 {
        return Err(RectifyError::EmptyTarget { width, height });
    }

    let target = [
        (0.0, 0.0),
        (width as f64, 0.0),
        (width as f64, height as f64),
        (0.0, height as f64),
    ];
    let source = points.map(|p| (p.x as f64, p.y as f64));
    let inverse = perspective_transform(&source, &target)?
        .try_inverse()
        .ok_or(RectifyError::SingularTransform)?;

    let crop = warp(image, &inverse, width, height);
    if options.rotate_vertical && height as f32 / width as f32 >= options.vertical_ratio {
        log::debug!("Rotating vertical crop of {width}x{height}");
        Ok(crop.rotate270())
    } else {
        Ok(crop)
    }
}

fn validate(points: &Quad) -> Result<(), RectifyError> {
    if let Some(index) = points
        .iter()
        .position(|p| !p.x.is_finite() || !p.y.is_finite())
    {
        return Err(RectifyError::NonFinitePoint { index });
    }
    for first in 0..4 {
        for second in first + 1..4 {
            if points[first] == points[second] {
                return Err(RectifyError::DuplicatePoints { first, second });
            }
        }
    }
    if signed_area(points).abs() < f32::EPSILON {
        return Err(RectifyError::ZeroArea);
    }
    Ok(())
}

/// Solves for the homography taking each `src` point onto the matching `dst`
/// point.
fn perspective_transform(
    src: &[(f64, f64); 4],
    dst: &[(f64, f64); 4],
) -> Result<Matrix3<f64>, RectifyError> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for (i, (&(x, y), &(u, v))) in src.iter().zip(dst).enumerate() {
        let row = i * 2;
        a.row_mut(row)
            .copy_from_slice(&[x, y, 1.0, 0.0, 0.0, 0.0, -x * u, -y * u]);
        b[row] = u;
        a.row_mut(row + 1)
            .copy_from_slice(&[0.0, 0.0, 0.0, x, y, 1.0, -x * v, -y * v]);
        b[row + 1] = v;
    }

    let h = a.lu().solve(&b).ok_or(RectifyError::SingularTransform)?;
    if h.iter().any(|c| !c.is_finite()) {
        return Err(RectifyError::SingularTransform);
    }
    Ok(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0))
}

fn warp(image: &DynamicImage, inverse: &Matrix3<f64>, width: u32, height: u32) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(buf) => {
            DynamicImage::ImageLuma8(warp_buffer(buf, inverse, width, height))
        }
        DynamicImage::ImageLumaA8(buf) => {
            DynamicImage::ImageLumaA8(warp_buffer(buf, inverse, width, height))
        }
        DynamicImage::ImageRgb8(buf) => {
            DynamicImage::ImageRgb8(warp_buffer(buf, inverse, width, height))
        }
        DynamicImage::ImageRgba8(buf) => {
            DynamicImage::ImageRgba8(warp_buffer(buf, inverse, width, height))
        }
        other if other.color().has_alpha() => {
            DynamicImage::ImageRgba8(warp_buffer(&other.to_rgba8(), inverse, width, height))
        }
        other => DynamicImage::ImageRgb8(warp_buffer(&other.to_rgb8(), inverse, width, height)),
    }
}

/// Inverse-maps every destination pixel into `src` and samples it with a
/// bicubic kernel. Samples outside the source repeat the nearest edge pixel.
fn warp_buffer<P>(
    src: &ImageBuffer<P, Vec<u8>>,
    inverse: &Matrix3<f64>,
    width: u32,
    height: u32,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let mut dst = ImageBuffer::<P, Vec<u8>>::new(width, height);
    for (x, y, pixel) in dst.enumerate_pixels_mut() {
        let mapped = inverse * Vector3::new(x as f64, y as f64, 1.0);
        if mapped.z.abs() <= f64::EPSILON {
            *pixel = *replicate(src, 0, 0);
            continue;
        }
        bicubic(src, mapped.x / mapped.z, mapped.y / mapped.z, pixel.channels_mut());
    }
    dst
}

#[inline]
fn replicate<P>(image: &ImageBuffer<P, Vec<u8>>, x: i64, y: i64) -> &P
where
    P: Pixel<Subpixel = u8>,
{
    let x = x.clamp(0, image.width() as i64 - 1) as u32;
    let y = y.clamp(0, image.height() as i64 - 1) as u32;
    image.get_pixel(x, y)
}

#[inline]
fn cubic_weight(t: f64) -> f64 {
    let t = t.abs();
    if t <= 1.0 {
        (CUBIC_A + 2.0) * t * t * t - (CUBIC_A + 3.0) * t * t + 1.0
    } else if t < 2.0 {
        CUBIC_A * t * t * t - 5.0 * CUBIC_A * t * t + 8.0 * CUBIC_A * t - 4.0 * CUBIC_A
    } else {
        0.0
    }
}

fn bicubic<P>(image: &ImageBuffer<P, Vec<u8>>, x: f64, y: f64, out: &mut [u8])
where
    P: Pixel<Subpixel = u8>,
{
    let (x0, y0) = (x.floor(), y.floor());
    let (dx, dy) = (x - x0, y - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);
    let wx = [dx + 1.0, dx, dx - 1.0, dx - 2.0].map(cubic_weight);
    let wy = [dy + 1.0, dy, dy - 1.0, dy - 2.0].map(cubic_weight);

    let mut acc = [0.0f64; 4];
    for (j, weight_y) in wy.iter().enumerate() {
        for (i, weight_x) in wx.iter().enumerate() {
            let sample = replicate(image, x0 - 1 + i as i64, y0 - 1 + j as i64);
            let weight = weight_x * weight_y;
            for (acc, channel) in acc.iter_mut().zip(sample.channels()) {
                *acc += weight * *channel as f64;
            }
        }
    }
    for (out, acc) in out.iter_mut().zip(acc) {
        *out = acc.round().clamp(0.0, 255.0) as u8;
    }
}

#[cfg(test)]
mod tests {
    use geo::Coord;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    use super::*;

    fn quad(points: [(f32, f32); 4]) -> Quad {
        points.map(|(x, y)| Coord { x, y })
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, ((x + y) * 3 % 256) as u8])
        }))
    }

    #[test]
    fn axis_aligned_quad_is_a_plain_crop() {
        let image = gradient(40, 30);
        let q = quad([(5.0, 4.0), (25.0, 4.0), (25.0, 14.0), (5.0, 14.0)]);
        let crop = rectify(&image, &q).unwrap();
        assert_eq!((crop.width(), crop.height()), (20, 10));
        let expected = image.crop_imm(5, 4, 20, 10).to_rgb8();
        assert_eq!(crop.to_rgb8(), expected);
    }

    #[test]
    fn size_is_truncated_longest_opposite_edge() {
        let image = gradient(100, 100);
        // top edge 30, bottom edge ~32.5; left edge 12, right edge ~12.6
        let q = quad([(10.0, 10.0), (40.0, 10.0), (42.0, 22.5), (9.5, 22.0)]);
        let crop = rectify(&image, &q).unwrap();
        assert_eq!(crop.width(), 32);
        assert_eq!(crop.height(), 12);
    }

    #[test]
    fn counter_clockwise_input_gives_same_crop() {
        let image = gradient(60, 60);
        let cw = quad([(8.0, 6.0), (50.0, 10.0), (48.0, 30.0), (6.0, 25.0)]);
        let ccw = [cw[0], cw[3], cw[2], cw[1]];
        let a = rectify(&image, &cw).unwrap();
        let b = rectify(&image, &ccw).unwrap();
        assert_eq!(a.to_rgb8(), b.to_rgb8());
    }

    #[test]
    fn tall_crop_is_rotated() {
        let image = gradient(50, 50);
        let q = quad([(10.0, 5.0), (20.0, 5.0), (20.0, 35.0), (10.0, 35.0)]);
        let crop = rectify(&image, &q).unwrap();
        assert_eq!((crop.width(), crop.height()), (30, 10));

        let upright = CropOptions {
            rotate_vertical: false,
            ..Default::default()
        };
        let crop = rectify_with(&image, &q, &upright).unwrap();
        assert_eq!((crop.width(), crop.height()), (10, 30));
    }

    #[test]
    fn out_of_bounds_samples_replicate_edges() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([200])));
        let q = quad([(-3.0, -3.0), (7.0, -3.0), (7.0, 5.0), (-3.0, 5.0)]);
        let crop = rectify(&image, &q).unwrap();
        assert_eq!((crop.width(), crop.height()), (10, 8));
        assert!(crop.to_luma8().pixels().all(|p| p.0 == [200]));
        assert!(matches!(crop, DynamicImage::ImageLuma8(_)));
    }

    #[test]
    fn padding_widens_crop() {
        let image = gradient(40, 40);
        let q = quad([(10.0, 10.0), (30.0, 10.0), (30.0, 20.0), (10.0, 20.0)]);
        let options = CropOptions {
            padding: 2,
            ..Default::default()
        };
        let crop = rectify_with(&image, &q, &options).unwrap();
        assert_eq!((crop.width(), crop.height()), (24, 14));
    }

    #[test]
    fn degenerate_quads_are_rejected() {
        let image = gradient(10, 10);
        let collinear = quad([(0.0, 0.0), (2.0, 0.0), (4.0, 0.0), (6.0, 0.0)]);
        assert_eq!(rectify(&image, &collinear), Err(RectifyError::ZeroArea));

        let repeated = quad([(0.0, 0.0), (5.0, 0.0), (5.0, 0.0), (0.0, 5.0)]);
        assert_eq!(
            rectify(&image, &repeated),
            Err(RectifyError::DuplicatePoints { first: 1, second: 2 })
        );

        let nan = quad([(0.0, 0.0), (f32::NAN, 0.0), (5.0, 5.0), (0.0, 5.0)]);
        assert_eq!(
            rectify(&image, &nan),
            Err(RectifyError::NonFinitePoint { index: 1 })
        );

        let sliver = quad([(0.0, 0.0), (0.5, 0.0), (0.5, 4.0), (0.0, 4.0)]);
        assert_eq!(
            rectify(&image, &sliver),
            Err(RectifyError::EmptyTarget { width: 0, height: 4 })
        );

        let empty = DynamicImage::new_rgb8(0, 0);
        let q = quad([(0.0, 0.0), (5.0, 0.0), (5.0, 5.0), (0.0, 5.0)]);
        assert_eq!(rectify(&empty, &q), Err(RectifyError::EmptyImage));
    }

    #[test]
    fn oversized_targets_are_rejected() {
        let image = gradient(10, 10);
        for side in [1e5, 1e10] {
            let huge = quad([(0.0, 0.0), (side, 0.0), (side, side), (0.0, side)]);
            assert!(matches!(
                rectify(&image, &huge),
                Err(RectifyError::TargetTooLarge { width, height })
                    if width == side && height == side
            ));
        }

        let wide = quad([(0.0, 0.0), (40_000.0, 0.0), (40_000.0, 3.0), (0.0, 3.0)]);
        assert!(matches!(
            rectify(&image, &wide),
            Err(RectifyError::TargetTooLarge { .. })
        ));
    }

    #[test]
    fn homography_maps_corners() {
        let src = [(1.0, 2.0), (11.0, 1.0), (12.0, 9.0), (0.0, 8.0)];
        let dst = [(0.0, 0.0), (10.0, 0.0), (10.0, 8.0), (0.0, 8.0)];
        let m = perspective_transform(&src, &dst).unwrap();
        for ((x, y), (u, v)) in src.into_iter().zip(dst) {
            let p = m * Vector3::new(x, y, 1.0);
            assert!((p.x / p.z - u).abs() < 1e-9);
            assert!((p.y / p.z - v).abs() < 1e-9);
        }
    }
}
