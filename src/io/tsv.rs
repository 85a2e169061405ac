// io/tsv.rs

use log::debug;
use ndarray::Array2;
use std::collections::HashMap;
use std::io::{BufRead, Write};

use crate::error::{PreprocessError, Result};
use crate::matrix::ExpressionDataMatrix;
use crate::model::{BioAssay, DesignElement};

const MISSING_TOKENS: [&str; 4] = ["", "NA", "NaN", "null"];

/// Hands out one `DesignElement` per probe name, so every file of a dataset agrees on
/// row identities.
#[derive(Debug, Default)]
pub struct DesignElementRegistry {
    by_name: HashMap<String, DesignElement>,
}

impl DesignElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn get_or_create(&mut self, name: &str, sequence: Option<&str>) -> DesignElement {
        let next_id = self.by_name.len() as u64 + 1;
        self.by_name
            .entry(name.to_string())
            .or_insert_with(|| {
                let de = DesignElement::new(next_id, name);
                match sequence {
                    Some(seq) if !seq.is_empty() => de.with_sequence(seq),
                    _ => de,
                }
            })
            .clone()
    }
}

pub fn parse_value(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if MISSING_TOKENS.iter().any(|t| cell.eq_ignore_ascii_case(t)) {
        return Some(f64::NAN);
    }
    cell.parse::<f64>().ok()
}

fn parse_error(source_name: &str, line: usize, reason: impl Into<String>) -> PreprocessError {
    PreprocessError::Parse {
        source_name: source_name.to_string(),
        line,
        reason: reason.into(),
    }
}

/// Reads a matrix whose header is `probe`, optionally `sequence`, then bio assay names.
///
/// Lines starting with `#` are skipped. Every column must name a bio assay in
/// `bio_assays`.
pub fn read_matrix<R: BufRead>(
    reader: R,
    source_name: &str,
    bio_assays: &HashMap<String, BioAssay>,
    registry: &mut DesignElementRegistry,
) -> Result<ExpressionDataMatrix> {
    let mut lines = reader
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .filter(|(_, l)| !matches!(l, Ok(s) if s.starts_with('#') || s.trim().is_empty()));

    let (header_line, header) = match lines.next() {
        Some((n, line)) => (n, line?),
        None => return Err(parse_error(source_name, 0, "file is empty")),
    };
    let fields: Vec<&str> = header.split('\t').map(str::trim).collect();
    if fields.first().map(|f| f.to_ascii_lowercase()) != Some("probe".to_string()) {
        return Err(parse_error(source_name, header_line, "first column must be 'probe'"));
    }
    let has_sequence = fields.get(1).is_some_and(|f| f.eq_ignore_ascii_case("sequence"));
    let first_data_col = if has_sequence { 2 } else { 1 };

    let columns: Vec<BioAssay> = fields[first_data_col..]
        .iter()
        .map(|name| {
            bio_assays.get(*name).cloned().ok_or_else(|| {
                parse_error(source_name, header_line, format!("unknown bio assay '{}'", name))
            })
        })
        .collect::<Result<_>>()?;
    let n_cols = columns.len();

    let mut design_elements = Vec::new();
    let mut values = Vec::new();
    for (line_no, line) in lines {
        let line = line?;
        let cells: Vec<&str> = line.split('\t').collect();
        if cells.len() != first_data_col + n_cols {
            return Err(parse_error(
                source_name,
                line_no,
                format!("expected {} fields, found {}", first_data_col + n_cols, cells.len()),
            ));
        }
        let sequence = if has_sequence { Some(cells[1].trim()) } else { None };
        design_elements.push(registry.get_or_create(cells[0].trim(), sequence));
        for cell in &cells[first_data_col..] {
            let v = parse_value(cell)
                .ok_or_else(|| parse_error(source_name, line_no, format!("not a number: '{}'", cell)))?;
            values.push(v);
        }
    }

    debug!("Read {} rows x {} columns from {}", design_elements.len(), n_cols, source_name);
    let data = Array2::from_shape_vec((design_elements.len(), n_cols), values)
        .map_err(|e| PreprocessError::Numerical(e.to_string()))?;
    ExpressionDataMatrix::new(design_elements, columns, data)
}

/// Writes `matrix` as TSV, missing values as `NA`, after optional `#` header lines.
pub fn write_matrix<W: Write>(writer: &mut W, matrix: &ExpressionDataMatrix, header: Option<&str>) -> Result<()> {
    if let Some(header) = header {
        write!(writer, "{}", header)?;
    }
    write!(writer, "probe")?;
    for ba in matrix.bio_assays() {
        write!(writer, "\t{}", ba.name)?;
    }
    writeln!(writer)?;

    for (i, de) in matrix.design_elements().iter().enumerate() {
        write!(writer, "{}", de.name)?;
        for v in matrix.row(i) {
            if v.is_nan() {
                write!(writer, "\tNA")?;
            } else {
                write!(writer, "\t{}", v)?;
            }
        }
        writeln!(writer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::test_support::bio_assays;

    fn assays_by_name() -> HashMap<String, BioAssay> {
        bio_assays(3).into_iter().map(|ba| (ba.name.clone(), ba)).collect()
    }

    #[test]
    fn test_read_with_sequence_column_and_missing_tokens() {
        let text = "# comment\nprobe\tsequence\tba2\tba0\n\
                    p1\tseqA\t1.5\tNA\n\
                    p2\t\tnull\t-2\n";
        let mut registry = DesignElementRegistry::new();
        let m = read_matrix(text.as_bytes(), "test.tsv", &assays_by_name(), &mut registry).unwrap();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.bio_assay_for_column(0).name, "ba2");
        assert_eq!(m.get(0, 0), 1.5);
        assert!(m.get(0, 1).is_nan());
        assert!(m.get(1, 0).is_nan());
        assert_eq!(m.get(1, 1), -2.0);
        let p1 = m.design_element_for_row(0);
        assert_eq!(p1.biological_characteristic.as_ref().unwrap().name, "seqA");
        assert!(m.design_element_for_row(1).biological_characteristic.is_none());
    }

    #[test]
    fn test_registry_shared_between_files() {
        let mut registry = DesignElementRegistry::new();
        let a = read_matrix("probe\tba0\nx\t1\ny\t2\n".as_bytes(), "a", &assays_by_name(), &mut registry).unwrap();
        let b = read_matrix("probe\tba1\ny\t3\nz\t4\n".as_bytes(), "b", &assays_by_name(), &mut registry).unwrap();
        assert_eq!(a.design_element_for_row(1).id, b.design_element_for_row(0).id);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_parse_errors_carry_line_numbers() {
        let mut registry = DesignElementRegistry::new();
        let err = read_matrix("probe\tba0\np1\tabc\n".as_bytes(), "bad.tsv", &assays_by_name(), &mut registry)
            .unwrap_err();
        assert!(matches!(err, PreprocessError::Parse { line: 2, .. }));

        let err = read_matrix("probe\tnobody\n".as_bytes(), "bad.tsv", &assays_by_name(), &mut registry)
            .unwrap_err();
        assert!(matches!(err, PreprocessError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_write_matrix() {
        let mut registry = DesignElementRegistry::new();
        let m = read_matrix("probe\tba0\tba1\np1\t1\tNA\n".as_bytes(), "a", &assays_by_name(), &mut registry)
            .unwrap();
        let mut out = Vec::new();
        write_matrix(&mut out, &m, Some("# lowVarianceCut 0.05\n")).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "# lowVarianceCut 0.05\nprobe\tba0\tba1\np1\t1\tNA\n"
        );
    }
}
