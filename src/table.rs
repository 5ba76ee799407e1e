use std::sync::LazyLock;

use regex::Regex;
use tracing::instrument;

use crate::{CellContent, ReconstructionError};

static QUOTED_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(colspan|rowspan)="(\d+)""#).expect("valid span pattern"));

/// Inclusive, zero-indexed block of grid cells merged into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MergeRange {
    pub start_row: usize,
    pub end_row: usize,
    pub start_col: usize,
    pub end_col: usize,
}

impl MergeRange {
    pub fn new(start_row: usize, end_row: usize, start_col: usize, end_col: usize) -> Self {
        Self {
            start_row,
            end_row,
            start_col,
            end_col,
        }
    }

    pub fn rowspan(&self) -> usize {
        self.end_row - self.start_row + 1
    }

    pub fn colspan(&self) -> usize {
        self.end_col - self.start_col + 1
    }

    fn as_array(&self) -> [usize; 4] {
        [self.start_row, self.end_row, self.start_col, self.end_col]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridCell {
    /// A cell no merge range touches.
    Plain,
    /// Top-left cell of a merge range.
    Span { colspan: usize, rowspan: usize },
    /// Covered by a merge range, emits nothing.
    Covered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    rows: usize,
    cols: usize,
    cells: Vec<GridCell>,
}

impl Grid {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<GridCell> {
        if row < self.rows && col < self.cols {
            Some(self.cells[row * self.cols + col])
        } else {
            None
        }
    }

    /// Number of cells that open a `<td>`, i.e. the number of content runs
    /// the table takes.
    pub fn opening_cells(&self) -> usize {
        self.cells
            .iter()
            .filter(|cell| !matches!(cell, GridCell::Covered))
            .count()
    }

    fn row(&self, row: usize) -> &[GridCell] {
        &self.cells[row * self.cols..(row + 1) * self.cols]
    }
}

/// Lays merge ranges out over a `rows` x `cols` grid.
#[instrument(level = "debug", skip(merges), fields(merges = merges.len()))]
pub fn build_grid(
    merges: &[MergeRange],
    rows: usize,
    cols: usize,
) -> Result<Grid, ReconstructionError> {
    let mut cells = vec![GridCell::Plain; rows * cols];
    let mut taken = vec![false; rows * cols];

    for merge in merges {
        let range = merge.as_array();
        if merge.start_row > merge.end_row || merge.start_col > merge.end_col {
            return Err(ReconstructionError::InvalidRange { range });
        }
        if merge.end_row >= rows || merge.end_col >= cols {
            return Err(ReconstructionError::OutOfBounds { range, rows, cols });
        }
        for row in merge.start_row..=merge.end_row {
            for col in merge.start_col..=merge.end_col {
                let index = row * cols + col;
                if taken[index] {
                    return Err(ReconstructionError::Overlap { range, row, col });
                }
                taken[index] = true;
                cells[index] = GridCell::Covered;
            }
        }
        // a 1x1 range still opens an attributed tag, just without attributes
        cells[merge.start_row * cols + merge.start_col] = GridCell::Span {
            colspan: merge.colspan(),
            rowspan: merge.rowspan(),
        };
    }

    Ok(Grid { rows, cols, cells })
}

/// Structure tokens for `grid`, rows top to bottom and cells left to right.
pub fn tokenize(grid: &Grid) -> Vec<String> {
    let mut tokens = vec!["<tbody>".to_string()];
    for row in 0..grid.rows() {
        tokens.push("<tr>".to_string());
        for cell in grid.row(row) {
            match *cell {
                GridCell::Covered => continue,
                GridCell::Plain => {
                    tokens.push("<td>".to_string());
                }
                GridCell::Span { colspan, rowspan } => {
                    tokens.push("<td".to_string());
                    if colspan > 1 {
                        tokens.push(format!(" colspan=\"{colspan}\""));
                    }
                    if rowspan > 1 {
                        tokens.push(format!(" rowspan=\"{rowspan}\""));
                    }
                    tokens.push(">".to_string());
                }
            }
            tokens.push("</td>".to_string());
        }
        tokens.push("</tr>".to_string());
    }
    tokens.push("</tbody>".to_string());
    tokens
}

/// [`build_grid`] followed by [`tokenize`].
pub fn structure_from_merges(
    merges: &[MergeRange],
    rows: usize,
    cols: usize,
) -> Result<Vec<String>, ReconstructionError> {
    build_grid(merges, rows, cols).map(|grid| tokenize(&grid))
}

fn is_cell_marker(token: &str) -> bool {
    token == "<td>" || token == ">"
}

fn escape_into(out: &mut String, token: &str) {
    for c in token.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
}

/// Fills `cells` into the structure `tokens` and wraps the result in an HTML
/// document.
///
/// Cell `i` goes right after the `i`-th `<td>` or `>` token. Single-character
/// content tokens are HTML escaped, longer ones are copied verbatim, so
/// multi-character tokens must already be valid markup.
#[instrument(level = "debug", skip_all, fields(tokens = tokens.len(), cells = cells.len()))]
pub fn rebuild_html<S: AsRef<str>>(
    tokens: &[S],
    cells: &[CellContent],
) -> Result<String, ReconstructionError> {
    let markers = tokens.iter().filter(|t| is_cell_marker(t.as_ref())).count();
    if markers != cells.len() {
        return Err(ReconstructionError::CellCountMismatch {
            markers,
            cells: cells.len(),
        });
    }

    let mut body = String::new();
    let mut cells = cells.iter();
    for token in tokens {
        let token = token.as_ref();
        body.push_str(token);
        if !is_cell_marker(token) {
            continue;
        }
        let Some(cell) = cells.next() else {
            break;
        };
        for part in &cell.tokens {
            if part.chars().count() == 1 {
                escape_into(&mut body, part);
            } else {
                body.push_str(part);
            }
        }
    }

    let body = QUOTED_SPAN.replace_all(&body, "$1=$2");
    Ok(format!("<html><body><table>{body}</table></body></html>"))
}
