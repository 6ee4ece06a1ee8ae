//! Conversion between pixel coordinates and `<loc_N>` tokens.
//!
//! Florence-2 expresses coordinates on a 1000-cell grid relative to the original image size.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::Florence2Error;

/// Number of cells of the location grid along each axis.
pub const LOCATION_BINS: u32 = 1000;

static LOC_TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<loc_(\d+)>").expect("LOC_TOKEN_REGEX pattern is invalid"));

/// The size of the original image, before preprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl From<&image::DynamicImage> for ImageSize {
    fn from(image: &image::DynamicImage) -> Self {
        Self::new(image.width(), image.height())
    }
}

/// A point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// An axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundingBox {
    /// The x-coordinate of the top-left corner.
    pub x: f32,
    /// The y-coordinate of the top-left corner.
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    /// Build a box from two opposite corners.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            w: (x2 - x1).abs(),
            h: (y2 - y1).abs(),
        }
    }

    /// The smallest box enclosing the points.
    pub fn enclosing(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self::from_corners(min_x, min_y, max_x, max_y))
    }
}

/// A pixel rectangle given as an input to region tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Region {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Encode the region as `<loc_x1><loc_y1><loc_x2><loc_y2>`.
    pub fn to_location_tokens(&self, image_size: ImageSize) -> String {
        let x1 = quantize(self.x1, image_size.width);
        let y1 = quantize(self.y1, image_size.height);
        let x2 = quantize(self.x2, image_size.width);
        let y2 = quantize(self.y2, image_size.height);
        format!("<loc_{x1}><loc_{y1}><loc_{x2}><loc_{y2}>")
    }
}

/// Map a pixel coordinate to its grid cell, clamped to `0..=999`.
pub fn quantize(pixel: u32, dim: u32) -> u32 {
    if dim == 0 {
        return 0;
    }
    let cell = pixel as u64 * LOCATION_BINS as u64 / dim as u64;
    cell.min(LOCATION_BINS as u64 - 1) as u32
}

/// Map a grid cell back to the pixel coordinate of its center.
pub fn dequantize(cell: u32, dim: u32) -> f32 {
    (cell as f32 + 0.5) * dim as f32 / LOCATION_BINS as f32
}

/// Extract the values of every `<loc_N>` token in order.
pub fn parse_location_values(text: &str) -> Result<Vec<u32>, Florence2Error> {
    LOC_TOKEN_REGEX
        .captures_iter(text)
        .map(|caps| {
            caps[1]
                .parse::<u32>()
                .map_err(|_| Florence2Error::InvalidLocationTokens(caps[0].to_string()))
        })
        .collect()
}

/// Decode exactly four location tokens into a pixel box.
pub fn parse_region(tokens: &str, image_size: ImageSize) -> Result<BoundingBox, Florence2Error> {
    match parse_location_values(tokens)?.as_slice() {
        &[x1, y1, x2, y2] => Ok(BoundingBox::from_corners(
            dequantize(x1, image_size.width),
            dequantize(y1, image_size.height),
            dequantize(x2, image_size.width),
            dequantize(y2, image_size.height),
        )),
        values => Err(Florence2Error::InvalidLocationTokens(format!(
            "expected 4 location tokens, found {}",
            values.len()
        ))),
    }
}

/// Turn a flat list of values into points, dropping a trailing odd value.
pub(crate) fn values_to_points(values: &[u32], image_size: ImageSize) -> Vec<Point> {
    values
        .chunks_exact(2)
        .map(|xy| Point {
            x: dequantize(xy[0], image_size.width),
            y: dequantize(xy[1], image_size.height),
        })
        .collect()
}
