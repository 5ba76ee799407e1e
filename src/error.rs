use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RectifyError {
    #[error("quad point {index} is not finite")]
    NonFinitePoint { index: usize },

    #[error("quad points {first} and {second} coincide")]
    DuplicatePoints { first: usize, second: usize },

    #[error("quad has zero area")]
    ZeroArea,

    #[error("source image is empty")]
    EmptyImage,

    #[error("target size {width}x{height} is empty")]
    EmptyTarget { width: u32, height: u32 },

    #[error("target size {width}x{height} is too large")]
    TargetTooLarge { width: f32, height: f32 },

    #[error("cannot solve perspective transform")]
    SingularTransform,
}

/// Why one labelled region produced no crop.
#[derive(Debug, Error)]
pub enum CropError {
    #[error("cannot open image: {0}")]
    Open(#[from] image::ImageError),

    #[error("{points} points do not form a quad")]
    NotAQuad { points: usize },

    #[error(transparent)]
    Rectify(#[from] RectifyError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconstructionError {
    #[error("merge range {range:?} has start after end")]
    InvalidRange { range: [usize; 4] },

    #[error("merge range {range:?} lies outside the {rows}x{cols} grid")]
    OutOfBounds {
        range: [usize; 4],
        rows: usize,
        cols: usize,
    },

    #[error("merge range {range:?} overlaps another range at ({row}, {col})")]
    Overlap {
        range: [usize; 4],
        row: usize,
        col: usize,
    },

    #[error("token stream has {markers} cell markers but {cells} cells were supplied")]
    CellCountMismatch { markers: usize, cells: usize },
}

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("line {line}: invalid annotation JSON: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("line {line}: missing tab separator")]
    MissingTab { line: usize },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Label(#[from] LabelError),

    #[error(transparent)]
    Reconstruction(#[from] ReconstructionError),

    #[error("failed to encode {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to serialize record: {0}")]
    Json(#[from] serde_json::Error),
}
