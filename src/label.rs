//! Text formats of an annotation directory.
//!
//! * `Label.txt`: `<image path>\t<JSON array of annotations>` per line.
//! * `rec_gt.txt`: `<crop path>\t<transcription>` per line.
//! * table pre-annotations: `<image name>\t<html>` per line.
//! * `fileState.txt`: `<image path>\t1` per image marked as checked.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::Path,
};

use tracing::instrument;

use crate::{Annotation, LabelError};

/// All annotations of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelEntry {
    pub image: String,
    pub annotations: Vec<Annotation>,
}

/// Parses one `Label.txt` line. `line_no` is only used in errors.
pub fn parse_label_line(line: &str, line_no: usize) -> Result<LabelEntry, LabelError> {
    let (image, label) = line
        .split_once('\t')
        .ok_or(LabelError::MissingTab { line: line_no })?;
    let label = label.trim();
    let annotations = if label.is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(label).map_err(|source| LabelError::Json {
            line: line_no,
            source,
        })?
    };
    Ok(LabelEntry {
        image: image.to_string(),
        annotations,
    })
}

pub fn format_label_line(entry: &LabelEntry) -> Result<String, serde_json::Error> {
    Ok(format!(
        "{}\t{}",
        entry.image,
        serde_json::to_string(&entry.annotations)?
    ))
}

#[instrument(level = "debug")]
pub fn read_label_file(path: &Path) -> Result<Vec<LabelEntry>, LabelError> {
    let contents = fs::read_to_string(path)?;
    let entries = contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| parse_label_line(line, i + 1))
        .collect::<Result<Vec<_>, _>>()?;
    log::debug!("Read {} label entries from {}", entries.len(), path.display());
    Ok(entries)
}

/// Writes `entries` in `Label.txt` format. Images without annotations are
/// left out.
#[instrument(level = "debug", skip(entries))]
pub fn write_label_file(path: &Path, entries: &[LabelEntry]) -> Result<(), LabelError> {
    let mut out = BufWriter::new(File::create(path)?);
    for (i, entry) in entries.iter().enumerate() {
        if entry.annotations.is_empty() {
            continue;
        }
        let line =
            format_label_line(entry).map_err(|source| LabelError::Json { line: i + 1, source })?;
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}

/// Reads the images marked as checked. A missing file means nothing has been
/// checked yet.
#[instrument(level = "debug")]
pub fn read_file_state(path: &Path) -> Result<Vec<String>, LabelError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut checked = Vec::new();
    for (i, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match line.split_once('\t') {
            Some((image, _)) => checked.push(image.to_string()),
            None => log::warn!("{}:{}: missing tab separator", path.display(), i + 1),
        }
    }
    Ok(checked)
}

#[instrument(level = "debug", skip(images))]
pub fn write_file_state<S: AsRef<str>>(
    path: &Path,
    images: impl IntoIterator<Item = S>,
) -> Result<(), LabelError> {
    let mut out = BufWriter::new(File::create(path)?);
    for image in images {
        writeln!(out, "{}\t1", image.as_ref())?;
    }
    out.flush()?;
    Ok(())
}

pub fn rec_gt_line(crop_path: &str, transcription: &str) -> String {
    format!("{crop_path}\t{transcription}")
}

/// Reads a table pre-annotation file. Lines that don't hold both a name and
/// some HTML are skipped.
#[instrument(level = "debug")]
pub fn read_html_file(path: &Path) -> Result<Vec<(String, String)>, LabelError> {
    let contents = fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for (i, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once(char::is_whitespace) {
            Some((name, html)) => entries.push((name.to_string(), html.trim_start().to_string())),
            None => log::warn!("{}:{}: cannot parse line: {line}", path.display(), i + 1),
        }
    }
    Ok(entries)
}

#[instrument(level = "debug", skip(entries))]
pub fn write_html_file<K, V>(
    path: &Path,
    entries: impl IntoIterator<Item = (K, V)>,
) -> Result<(), LabelError>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut out = BufWriter::new(File::create(path)?);
    for (name, html) in entries {
        writeln!(out, "{}\t{}", name.as_ref(), html.as_ref())?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_label_line() {
        let line = "imgs/a.jpg\t[{\"transcription\": \"Hi\", \
                    \"points\": [[1, 2], [10, 2], [10, 8], [1, 8]], \
                    \"difficult\": false, \"key_cls\": \"None\"}]";
        let entry = parse_label_line(line, 1).unwrap();
        assert_eq!(entry.image, "imgs/a.jpg");
        assert_eq!(entry.annotations.len(), 1);
        let a = &entry.annotations[0];
        assert_eq!(a.transcription, "Hi");
        assert_eq!(a.points, vec![[1.0, 2.0], [10.0, 2.0], [10.0, 8.0], [1.0, 8.0]]);
        assert_eq!(a.key_cls.as_deref(), Some("None"));
    }

    #[test]
    fn empty_label_has_no_annotations() {
        let entry = parse_label_line("a.jpg\t\n", 3).unwrap();
        assert!(entry.annotations.is_empty());
    }

    #[test]
    fn bad_lines_report_line_number() {
        assert!(matches!(
            parse_label_line("no tab here", 4),
            Err(LabelError::MissingTab { line: 4 })
        ));
        assert!(matches!(
            parse_label_line("a.jpg\t[{]", 7),
            Err(LabelError::Json { line: 7, .. })
        ));
    }

    #[test]
    fn label_file_round_trip_drops_empty_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Label.txt");
        let entries = vec![
            LabelEntry {
                image: "x/1.png".into(),
                annotations: vec![Annotation::new(
                    "文字",
                    vec![[0.0, 0.0], [4.0, 0.0], [4.0, 2.5], [0.0, 2.5]],
                )],
            },
            LabelEntry {
                image: "x/2.png".into(),
                annotations: vec![],
            },
        ];
        write_label_file(&path, &entries).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "x/1.png\t[{\"transcription\":\"文字\",\
             \"points\":[[0,0],[4,0],[4,2.5],[0,2.5]],\"difficult\":false}]\n"
        );
        assert_eq!(read_label_file(&path).unwrap(), entries[..1].to_vec());
    }

    #[test]
    fn html_file_skips_unparseable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("html.txt");
        fs::write(
            &path,
            "a.png\t<html><body></body></html>\n\nbroken\nb.png   <table></table>\n",
        )
        .unwrap();
        let entries = read_html_file(&path).unwrap();
        assert_eq!(
            entries,
            vec![
                ("a.png".to_string(), "<html><body></body></html>".to_string()),
                ("b.png".to_string(), "<table></table>".to_string()),
            ]
        );

        write_html_file(&path, entries.iter().map(|(k, v)| (k, v))).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "a.png\t<html><body></body></html>\nb.png\t<table></table>\n"
        );
    }

    #[test]
    fn fractional_points_survive_rewrite() {
        let line = "a.jpg\t[{\"transcription\":\"x\",\
                    \"points\":[[1.3,2],[10.7,2],[10,8.25],[1,8]],\"difficult\":false}]";
        let entry = parse_label_line(line, 1).unwrap();
        assert_eq!(entry.annotations[0].points[0], [1.3, 2.0]);
        assert_eq!(format_label_line(&entry).unwrap(), line);
    }

    #[test]
    fn file_state_lists_checked_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fileState.txt");
        assert!(read_file_state(&path).unwrap().is_empty());

        write_file_state(&path, ["imgs/1.jpg", "imgs/2.jpg"]).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "imgs/1.jpg\t1\nimgs/2.jpg\t1\n"
        );

        fs::write(&path, "imgs/1.jpg\t1\n\nno state\nimgs/3.jpg\t1\n").unwrap();
        assert_eq!(read_file_state(&path).unwrap(), vec!["imgs/1.jpg", "imgs/3.jpg"]);
    }

    #[test]
    fn rec_gt_is_tab_separated() {
        assert_eq!(
            rec_gt_line("crop_img/a_crop_0.jpg", "hello"),
            "crop_img/a_crop_0.jpg\thello"
        );
    }
}
