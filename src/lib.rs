use std::{
    collections::HashSet,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

mod error;
pub mod label;
pub mod rectify;
mod result;
pub mod table;
pub mod util;

use image::DynamicImage;
use tracing::instrument;

pub use error::*;
pub use label::LabelEntry;
pub use rectify::{rectify, rectify_with};
pub use result::*;
pub use table::{
    build_grid, rebuild_html, structure_from_merges, tokenize, Grid, GridCell, MergeRange,
};
use util::{natural_sort, quad_from_polygon};

/// Per-request crop parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropOptions {
    /// Pixels added around the quad before cropping.
    pub padding: u32,
    /// Height to width ratio from which a crop counts as vertical text.
    pub vertical_ratio: f32,
    pub rotate_vertical: bool,
}

impl Default for CropOptions {
    fn default() -> Self {
        Self {
            padding: 0,
            vertical_ratio: 1.5,
            rotate_vertical: true,
        }
    }
}

pub struct ExporterBuilder {
    image_root: Option<PathBuf>,
    checked: Option<HashSet<String>>,
    crop_dir: String,
    crop_options: CropOptions,
    skip_difficult: bool,
    natural_order: bool,
}

impl ExporterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory the image paths in `Label.txt` are relative to. Defaults to
    /// the parent of the export directory.
    pub fn image_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_root = Some(path.into());
        self
    }

    /// Only export these images, as listed in `fileState.txt`.
    pub fn checked_images<I, S>(mut self, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.checked = Some(images.into_iter().map(Into::into).collect());
        self
    }

    pub fn crop_dir(mut self, name: impl Into<String>) -> Self {
        self.crop_dir = name.into();
        self
    }

    pub fn crop_options(mut self, options: CropOptions) -> Self {
        self.crop_options = options;
        self
    }

    pub fn padding(mut self, padding: u32) -> Self {
        self.crop_options.padding = padding;
        self
    }

    pub fn skip_difficult(mut self, skip: bool) -> Self {
        self.skip_difficult = skip;
        self
    }

    pub fn natural_order(mut self, natural_order: bool) -> Self {
        self.natural_order = natural_order;
        self
    }

    pub fn build(self) -> Exporter {
        Exporter {
            image_root: self.image_root,
            checked: self.checked,
            crop_dir: self.crop_dir,
            crop_options: self.crop_options,
            skip_difficult: self.skip_difficult,
            natural_order: self.natural_order,
        }
    }
}

impl Default for ExporterBuilder {
    fn default() -> Self {
        Self {
            image_root: None,
            checked: None,
            crop_dir: "crop_img".to_string(),
            crop_options: CropOptions::default(),
            skip_difficult: true,
            natural_order: true,
        }
    }
}

/// A region that could not be cropped.
#[derive(Debug)]
pub struct CropFailure {
    pub image: String,
    /// Annotation index, `None` when the image itself could not be read.
    pub index: Option<usize>,
    pub reason: CropError,
}

#[derive(Debug, Default)]
pub struct CropReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<CropFailure>,
}

pub struct Exporter {
    image_root: Option<PathBuf>,
    checked: Option<HashSet<String>>,
    crop_dir: String,
    crop_options: CropOptions,
    skip_difficult: bool,
    natural_order: bool,
}

impl Exporter {
    /// Crops every annotation into `<out_dir>/<crop_dir>/` and writes the
    /// matching recognition labels to `<out_dir>/rec_gt.txt`.
    ///
    /// Unreadable images and regions that cannot be rectified are reported
    /// in [`CropReport::failed`] and skipped.
    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    pub fn export_crops(
        &self,
        entries: &[LabelEntry],
        out_dir: &Path,
    ) -> Result<CropReport, ExportError> {
        let crop_dir = out_dir.join(&self.crop_dir);
        fs::create_dir_all(&crop_dir)?;
        let image_root = match &self.image_root {
            Some(root) => root.clone(),
            None => out_dir.parent().unwrap_or(Path::new(".")).to_path_buf(),
        };

        let mut order = entries
            .iter()
            .filter(|entry| self.is_checked(&entry.image))
            .collect::<Vec<_>>();
        if self.natural_order {
            natural_sort(&mut order, |entry| entry.image.to_lowercase());
        }

        let mut rec_gt = BufWriter::new(File::create(out_dir.join("rec_gt.txt"))?);
        let mut report = CropReport::default();
        for entry in order {
            let image = match image::open(image_root.join(&entry.image)) {
                Ok(image) => image,
                Err(err) => {
                    log::error!("Failed to open {}: {err}", entry.image);
                    report.failed.push(CropFailure {
                        image: entry.image.clone(),
                        index: None,
                        reason: err.into(),
                    });
                    continue;
                }
            };
            let stem = Path::new(&entry.image)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| entry.image.clone());

            for (i, annotation) in entry.annotations.iter().enumerate() {
                if annotation.difficult && self.skip_difficult {
                    continue;
                }
                let crop = match self.crop(&image, annotation) {
                    Ok(crop) => crop,
                    Err(reason) => {
                        log::warn!("Cannot crop box {i} of {}: {reason}", entry.image);
                        report.failed.push(CropFailure {
                            image: entry.image.clone(),
                            index: Some(i),
                            reason,
                        });
                        continue;
                    }
                };

                let name = format!("{stem}_crop_{i}.jpg");
                let path = crop_dir.join(&name);
                crop.save(&path).map_err(|source| ExportError::Image {
                    path: path.clone(),
                    source,
                })?;
                let crop_path = format!("{}/{name}", self.crop_dir);
                writeln!(
                    rec_gt,
                    "{}",
                    label::rec_gt_line(&crop_path, &annotation.transcription)
                )?;
                report.written.push(path);
            }
        }
        rec_gt.flush()?;

        log::info!(
            "Exported {} crops, {} failures",
            report.written.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn is_checked(&self, image: &str) -> bool {
        self.checked
            .as_ref()
            .map_or(true, |checked| checked.contains(image))
    }

    fn crop(
        &self,
        image: &DynamicImage,
        annotation: &Annotation,
    ) -> Result<DynamicImage, CropError> {
        let quad = quad_from_polygon(&annotation.polygon()).ok_or(CropError::NotAQuad {
            points: annotation.points.len(),
        })?;
        let crop = rectify_with(image, &quad, &self.crop_options)?;
        // JPEG has no alpha channel
        if crop.color().has_alpha() {
            Ok(DynamicImage::ImageRgb8(crop.to_rgb8()))
        } else {
            Ok(crop)
        }
    }
}

/// Table ground truth for one image: the structure derived from `merges`, one
/// cell per annotation in reading order, and the rebuilt HTML.
#[instrument(level = "debug", skip(annotations, merges))]
pub fn table_record(
    image: &str,
    annotations: &[Annotation],
    merges: &[MergeRange],
    rows: usize,
    cols: usize,
) -> Result<TableRecord, ExportError> {
    let tokens = structure_from_merges(merges, rows, cols)?;
    let cells = annotations
        .iter()
        .map(|a| CellContent::from_text(&a.transcription).with_bbox(a.points.clone()))
        .collect::<Vec<_>>();
    let gt = rebuild_html(&tokens, &cells)?;
    let filename = Path::new(image)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| image.to_string());

    Ok(TableRecord {
        filename,
        html: TableHtml {
            structure: TableStructure { tokens },
            cells,
        },
        gt,
    })
}

/// Writes one JSON record per line.
#[instrument(skip(records), fields(records = records.len()))]
pub fn write_table_records(records: &[TableRecord], path: &Path) -> Result<(), ExportError> {
    let mut out = BufWriter::new(File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}
