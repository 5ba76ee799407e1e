use geo::Coord;
use serde::{Deserialize, Serialize};

/// A point in image pixel space.
pub type Point = Coord<f32>;

/// Four corners of a text region, nominally top-left, top-right,
/// bottom-right, bottom-left.
pub type Quad = [Point; 4];

/// One labelled box of a `Label.txt` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub transcription: String,
    #[serde(with = "pixel_points")]
    pub points: Vec<[f32; 2]>,
    #[serde(default)]
    pub difficult: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_cls: Option<String>,
}

impl Annotation {
    pub fn new(transcription: impl Into<String>, points: Vec<[f32; 2]>) -> Self {
        Self {
            transcription: transcription.into(),
            points,
            difficult: false,
            key_cls: None,
        }
    }

    pub fn polygon(&self) -> Vec<Point> {
        self.points.iter().map(|&[x, y]| Coord { x, y }).collect()
    }
}

/// Literal content of one table cell, aligned with an opening cell marker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellContent {
    pub tokens: Vec<String>,
    #[serde(default, with = "pixel_points")]
    pub bbox: Vec<[f32; 2]>,
}

impl CellContent {
    /// Splits `text` into one token per character.
    pub fn from_text(text: &str) -> Self {
        Self {
            tokens: text.chars().map(String::from).collect(),
            bbox: Vec::new(),
        }
    }

    pub fn with_bbox(mut self, bbox: Vec<[f32; 2]>) -> Self {
        self.bbox = bbox;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStructure {
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableHtml {
    pub structure: TableStructure,
    pub cells: Vec<CellContent>,
}

/// One line of the table ground truth file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub filename: String,
    pub html: TableHtml,
    pub gt: String,
}

/// Label files mostly store whole pixels; integral coordinates are written
/// back without a fractional part, others in their shortest `f32` form.
mod pixel_points {
    use serde::{ser::SerializeSeq, Deserialize, Deserializer, Serialize, Serializer};

    struct Coordinate(f32);

    impl Serialize for Coordinate {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let value = self.0;
            if value.fract() == 0.0 && value.abs() < i64::MAX as f32 {
                serializer.serialize_i64(value as i64)
            } else {
                serializer.serialize_f32(value)
            }
        }
    }

    pub fn serialize<S: Serializer>(
        points: &[[f32; 2]],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(points.len()))?;
        for &[x, y] in points {
            seq.serialize_element(&[Coordinate(x), Coordinate(y)])?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<[f32; 2]>, D::Error> {
        Vec::<[f32; 2]>::deserialize(deserializer)
    }
}
