// io/samples.rs

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::BufRead;

use crate::error::{PreprocessError, Result};
use crate::model::{ArrayDesign, BioAssay, BioMaterial, ExperimentalFactor, FactorValue};

const FACTOR_PREFIX: &str = "factor:";
const MEASUREMENT_PREFIX: &str = "measurement:";
const REQUIRED: [&str; 4] = ["bioassay", "biomaterial_id", "array_design", "processing_date"];

enum FactorColumn {
    Categorical(ExperimentalFactor),
    Continuous(ExperimentalFactor),
}

fn parse_error(source_name: &str, line: usize, reason: impl Into<String>) -> PreprocessError {
    PreprocessError::Parse {
        source_name: source_name.to_string(),
        line,
        reason: reason.into(),
    }
}

/// Reads the sample sheet: one bio assay per line.
///
/// Categorical levels share a factor value id per (factor, level); measurements get
/// one factor value each. Empty factor cells mean the sample has no value.
pub fn read_sample_sheet<R: BufRead>(reader: R, source_name: &str) -> Result<Vec<BioAssay>> {
    let mut lines = reader
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .filter(|(_, l)| !matches!(l, Ok(s) if s.starts_with('#') || s.trim().is_empty()));

    let (header_line, header) = match lines.next() {
        Some((n, line)) => (n, line?),
        None => return Err(parse_error(source_name, 0, "sample sheet is empty")),
    };
    let fields: Vec<String> = header.split('\t').map(|f| f.trim().to_string()).collect();
    for (i, name) in REQUIRED.iter().enumerate() {
        if fields.get(i).map(String::as_str) != Some(*name) {
            return Err(parse_error(
                source_name,
                header_line,
                format!("column {} must be '{}'", i + 1, name),
            ));
        }
    }

    let mut factor_columns = Vec::new();
    for (i, field) in fields[REQUIRED.len()..].iter().enumerate() {
        let factor_id = i as u64 + 1;
        if let Some(name) = field.strip_prefix(FACTOR_PREFIX) {
            factor_columns.push(FactorColumn::Categorical(ExperimentalFactor { id: factor_id, name: name.to_string() }));
        } else if let Some(name) = field.strip_prefix(MEASUREMENT_PREFIX) {
            factor_columns.push(FactorColumn::Continuous(ExperimentalFactor { id: factor_id, name: name.to_string() }));
        } else {
            return Err(parse_error(
                source_name,
                header_line,
                format!("column '{}' must start with '{}' or '{}'", field, FACTOR_PREFIX, MEASUREMENT_PREFIX),
            ));
        }
    }

    let mut array_designs: HashMap<String, ArrayDesign> = HashMap::new();
    let mut levels: HashMap<(u64, String), u64> = HashMap::new();
    let mut next_factor_value_id = 1u64;
    let mut bio_assays: Vec<BioAssay> = Vec::new();

    for (line_no, line) in lines {
        let line = line?;
        let cells: Vec<&str> = line.split('\t').map(str::trim).collect();
        if cells.len() != fields.len() {
            return Err(parse_error(
                source_name,
                line_no,
                format!("expected {} fields, found {}", fields.len(), cells.len()),
            ));
        }

        let name = cells[0].to_string();
        if bio_assays.iter().any(|ba| ba.name == name) {
            return Err(parse_error(source_name, line_no, format!("duplicate bio assay '{}'", name)));
        }
        let bio_material_id: u64 = cells[1]
            .parse()
            .map_err(|_| parse_error(source_name, line_no, format!("bad biomaterial id '{}'", cells[1])))?;
        let next_ad_id = array_designs.len() as u64 + 1;
        let array_design = array_designs
            .entry(cells[2].to_string())
            .or_insert_with(|| ArrayDesign { id: next_ad_id, short_name: cells[2].to_string() })
            .clone();
        let processing_date = if cells[3].is_empty() {
            None
        } else {
            let parsed = DateTime::parse_from_rfc3339(cells[3])
                .map_err(|e| parse_error(source_name, line_no, format!("bad date '{}': {}", cells[3], e)))?;
            Some(parsed.with_timezone(&Utc))
        };

        let mut factor_values = Vec::new();
        for (column, cell) in factor_columns.iter().zip(&cells[REQUIRED.len()..]) {
            if cell.is_empty() {
                continue;
            }
            let fv = match column {
                FactorColumn::Categorical(factor) => {
                    let id = *levels.entry((factor.id, cell.to_string())).or_insert_with(|| {
                        next_factor_value_id += 1;
                        next_factor_value_id - 1
                    });
                    FactorValue {
                        id,
                        experimental_factor: factor.clone(),
                        value: Some(cell.to_string()),
                        measurement: None,
                    }
                }
                FactorColumn::Continuous(factor) => {
                    next_factor_value_id += 1;
                    FactorValue {
                        id: next_factor_value_id - 1,
                        experimental_factor: factor.clone(),
                        value: None,
                        measurement: Some(cell.to_string()),
                    }
                }
            };
            factor_values.push(fv);
        }

        bio_assays.push(BioAssay {
            id: bio_assays.len() as u64 + 1,
            name: name.clone(),
            array_design_used: array_design,
            processing_date,
            sample_used: BioMaterial {
                id: bio_material_id,
                name,
                factor_values,
            },
        });
    }

    Ok(bio_assays)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = "bioassay\tbiomaterial_id\tarray_design\tprocessing_date\tfactor:treatment\tmeasurement:dose\n\
                         s1\t11\tGPL1\t2024-01-01T10:15:00Z\tcontrol\t0.5\n\
                         s2\t12\tGPL1\t\tdrug\t1.5\n\
                         s3\t13\tGPL2\t2024-01-02T10:15:00+02:00\tcontrol\t\n";

    #[test]
    fn test_sample_sheet() {
        let assays = read_sample_sheet(SHEET.as_bytes(), "samples.tsv").unwrap();
        assert_eq!(assays.len(), 3);
        assert_eq!(assays[0].sample_used.id, 11);
        assert_eq!(assays[2].array_design_used.short_name, "GPL2");
        assert_ne!(assays[0].array_design_used.id, assays[2].array_design_used.id);
        assert!(assays[1].processing_date.is_none());
        assert_eq!(
            assays[2].processing_date.unwrap().to_rfc3339(),
            "2024-01-02T08:15:00+00:00"
        );

        // same level, same surrogate id
        let treatment = |i: usize| assays[i].sample_used.factor_values[0].id;
        assert_eq!(treatment(0), treatment(2));
        assert_ne!(treatment(0), treatment(1));

        let dose = &assays[1].sample_used.factor_values[1];
        assert_eq!(dose.experimental_factor.name, "dose");
        assert_eq!(dose.measurement.as_deref(), Some("1.5"));
        assert_eq!(assays[2].sample_used.factor_values.len(), 1);
    }

    #[test]
    fn test_bad_header_and_rows() {
        assert!(read_sample_sheet("bioassay\tbiomaterial\n".as_bytes(), "x").is_err());
        let bad_id = "bioassay\tbiomaterial_id\tarray_design\tprocessing_date\ns1\tabc\tGPL1\t\n";
        assert!(matches!(
            read_sample_sheet(bad_id.as_bytes(), "x"),
            Err(PreprocessError::Parse { line: 2, .. })
        ));
        let bad_col = "bioassay\tbiomaterial_id\tarray_design\tprocessing_date\tcolor\n";
        assert!(read_sample_sheet(bad_col.as_bytes(), "x").is_err());
    }
}
