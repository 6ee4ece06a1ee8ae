//! Parse generated text into task-specific results.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::Florence2Error;
use crate::location::{
    dequantize, parse_location_values, values_to_points, BoundingBox, ImageSize, Point,
};
use crate::task::{Florence2Task, TaskOutput};

static LABELED_BOXES_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<label>[^<]*)(?P<locs>(?:\s*<loc_\d+>)+)")
        .expect("LABELED_BOXES_REGEX pattern is invalid")
});

static QUAD_BOXES_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<label>[^<]*)(?P<locs>(?:\s*<loc_\d+>){8})")
        .expect("QUAD_BOXES_REGEX pattern is invalid")
});

static LABELED_POLYGONS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(?P<label>[^<]*)(?:<poly>(?P<poly>.*?)</poly>|(?P<locs>(?:\s*<loc_\d+>)+))")
        .expect("LABELED_POLYGONS_REGEX pattern is invalid")
});

const POLYGON_SEPARATOR: &str = "<sep>";

/// A labeled axis-aligned box.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledBox {
    /// The category or phrase, empty for region proposals.
    pub label: String,
    pub bbox: BoundingBox,
}

/// A labeled quadrilateral, as produced by OCR with regions.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadBox {
    pub label: String,
    /// Corners in the order the model emitted them.
    pub points: [Point; 4],
}

impl QuadBox {
    /// The axis-aligned box enclosing the four corners.
    pub fn bounding_box(&self) -> BoundingBox {
        // four corners are never empty
        BoundingBox::enclosing(&self.points).unwrap_or_default()
    }
}

/// A polygon, labeled when the task names what it outlines.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub label: Option<String>,
    pub points: Vec<Point>,
}

/// The parsed output of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct Florence2Result {
    pub task: Florence2Task,
    /// The generated text with sequence markers removed.
    pub text: String,
    pub boxes: Vec<LabeledBox>,
    pub quad_boxes: Vec<QuadBox>,
    pub polygons: Vec<Polygon>,
}

impl Florence2Result {
    fn new(task: Florence2Task, text: &str) -> Self {
        Self {
            task,
            text: text.to_string(),
            boxes: Vec::new(),
            quad_boxes: Vec::new(),
            polygons: Vec::new(),
        }
    }

    /// Labels of the boxes, quad boxes and polygons in that order.
    pub fn labels(&self) -> Vec<&str> {
        self.boxes
            .iter()
            .map(|b| b.label.as_str())
            .chain(self.quad_boxes.iter().map(|q| q.label.as_str()))
            .chain(self.polygons.iter().filter_map(|p| p.label.as_deref()))
            .collect()
    }
}

/// Parse the raw generated text of a task.
///
/// `raw_text` must keep the `<loc_N>`, `<poly>` and `<sep>` tokens; only the sequence markers may
/// be stripped. Coordinates are mapped back to the original `image_size`.
///
/// # Errors
///
/// Returns [`Florence2Error::InvalidLocationTokens`] if a location value does not fit in `u32`.
pub fn parse_output(
    task: Florence2Task,
    raw_text: &str,
    image_size: ImageSize,
) -> Result<Florence2Result, Florence2Error> {
    let text = raw_text.trim();
    let mut result = Florence2Result::new(task, text);

    match task.output() {
        TaskOutput::Text => {}
        TaskOutput::LabeledBoxes => {
            result.boxes = parse_labeled_boxes(text, image_size)?;
        }
        TaskOutput::QuadBoxes => {
            result.quad_boxes = parse_quad_boxes(text, image_size)?;
        }
        TaskOutput::Polygons => {
            result.polygons = parse_polygons(text, None, image_size)?;
        }
        TaskOutput::LabeledPolygons => {
            let (boxes, polygons) = parse_labeled_polygons(text, image_size)?;
            result.boxes = boxes;
            result.polygons = polygons;
        }
    }

    log::debug!(
        "{task}: {} boxes, {} quad boxes, {} polygons",
        result.boxes.len(),
        result.quad_boxes.len(),
        result.polygons.len()
    );

    Ok(result)
}

// `car<loc_..>x4 wheel<loc_..>x8`: every group of four values is a box sharing the label
fn parse_labeled_boxes(
    text: &str,
    image_size: ImageSize,
) -> Result<Vec<LabeledBox>, Florence2Error> {
    let mut boxes = Vec::new();
    for caps in LABELED_BOXES_REGEX.captures_iter(text) {
        let label = caps["label"].trim();
        boxes.extend(boxes_from_values(
            label,
            &parse_location_values(&caps["locs"])?,
            image_size,
        ));
    }
    Ok(boxes)
}

fn boxes_from_values(label: &str, values: &[u32], image_size: ImageSize) -> Vec<LabeledBox> {
    if values.len() % 4 != 0 {
        log::debug!(
            "ignoring {} trailing location values after `{label}`",
            values.len() % 4
        );
    }
    values
        .chunks_exact(4)
        .map(|v| LabeledBox {
            label: label.to_string(),
            bbox: BoundingBox::from_corners(
                dequantize(v[0], image_size.width),
                dequantize(v[1], image_size.height),
                dequantize(v[2], image_size.width),
                dequantize(v[3], image_size.height),
            ),
        })
        .collect()
}

fn parse_quad_boxes(text: &str, image_size: ImageSize) -> Result<Vec<QuadBox>, Florence2Error> {
    let mut quads = Vec::new();
    for caps in QUAD_BOXES_REGEX.captures_iter(text) {
        let values = parse_location_values(&caps["locs"])?;
        let points = values_to_points(&values, image_size);
        let Ok(points) = <[Point; 4]>::try_from(points) else {
            continue;
        };
        quads.push(QuadBox {
            label: caps["label"].trim().to_string(),
            points,
        });
    }
    Ok(quads)
}

// polygons are separated by `<sep>`; fewer than three vertices is not a polygon
fn parse_polygons(
    text: &str,
    label: Option<&str>,
    image_size: ImageSize,
) -> Result<Vec<Polygon>, Florence2Error> {
    let mut polygons = Vec::new();
    for part in text.split(POLYGON_SEPARATOR) {
        let points = values_to_points(&parse_location_values(part)?, image_size);
        if points.len() < 3 {
            continue;
        }
        polygons.push(Polygon {
            label: label.map(str::to_string),
            points,
        });
    }
    Ok(polygons)
}

// `arms<poly>...</poly>`, or a plain box when the model did not emit a polygon
fn parse_labeled_polygons(
    text: &str,
    image_size: ImageSize,
) -> Result<(Vec<LabeledBox>, Vec<Polygon>), Florence2Error> {
    let mut boxes = Vec::new();
    let mut polygons = Vec::new();
    for caps in LABELED_POLYGONS_REGEX.captures_iter(text) {
        let label = caps["label"].trim();
        if let Some(poly) = caps.name("poly") {
            polygons.extend(parse_polygons(poly.as_str(), Some(label), image_size)?);
        } else if let Some(locs) = caps.name("locs") {
            boxes.extend(boxes_from_values(
                label,
                &parse_location_values(locs.as_str())?,
                image_size,
            ));
        }
    }
    Ok((boxes, polygons))
}
