//! Reading design matrices and outcomes from delimited text, and writing
//! feature-level results as TSV.
//!
//! Input files are comma- or tab-separated (chosen by extension: `.tsv` and
//! `.txt` are tab-separated). A first line none of whose fields parse as
//! numbers is treated as a header and skipped. Errors report the line number
//! in the file.

use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Failed to read or write '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Malformed delimited file '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("'{path}' line {line}, column {column}: cannot parse '{value}' as a number")]
    Parse {
        path: String,
        line: usize,
        column: usize,
        value: String,
    },
    #[error("'{path}' line {line} has {found} fields, expected {expected}")]
    Ragged {
        path: String,
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("'{0}' contains no data rows")]
    Empty(String),
    #[error("'{path}' must hold a single column or a single row, found {rows} x {cols}")]
    NotAVector { path: String, rows: usize, cols: usize },
    #[error("Result columns have different lengths ({0})")]
    ColumnLengths(String),
}

fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("tsv") | Some("txt") => b'\t',
        _ => b',',
    }
}

/// A non-blank line of a delimited file and its 1-based line number.
struct Record {
    line: usize,
    fields: Vec<String>,
}

fn read_records(path: &Path) -> Result<Vec<Record>, DataError> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|source| DataError::Io {
        path: display.clone(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter_for(path))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut records = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|source| DataError::Csv {
            path: display.clone(),
            source,
        })?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        let line = record
            .position()
            .map_or(index + 1, |position| position.line() as usize);
        records.push(Record {
            line,
            fields: record.iter().map(str::to_string).collect(),
        });
    }
    Ok(records)
}

fn parse_numeric<T: std::str::FromStr>(path: &Path) -> Result<(Vec<T>, usize, usize), DataError> {
    let display = path.display().to_string();
    let mut records = read_records(path)?;
    if let Some(first) = records.first() {
        if first.fields.iter().all(|field| field.parse::<T>().is_err()) {
            log::debug!("Treating the first line of '{}' as a header", display);
            records.remove(0);
        }
    }
    let Some(first) = records.first() else {
        return Err(DataError::Empty(display));
    };
    let n_cols = first.fields.len();
    let n_rows = records.len();

    let mut values = Vec::with_capacity(n_rows * n_cols);
    for record in &records {
        if record.fields.len() != n_cols {
            return Err(DataError::Ragged {
                path: display,
                line: record.line,
                expected: n_cols,
                found: record.fields.len(),
            });
        }
        for (column, field) in record.fields.iter().enumerate() {
            let value = field.parse::<T>().map_err(|_| DataError::Parse {
                path: display.clone(),
                line: record.line,
                column: column + 1,
                value: field.clone(),
            })?;
            values.push(value);
        }
    }
    Ok((values, n_rows, n_cols))
}

/// Reads a numeric matrix, one sample per line.
pub fn read_matrix(path: &Path) -> Result<Array2<f64>, DataError> {
    let (values, n_rows, n_cols) = parse_numeric::<f64>(path)?;
    Array2::from_shape_vec((n_rows, n_cols), values).map_err(|_| DataError::Ragged {
        path: path.display().to_string(),
        line: 0,
        expected: n_cols,
        found: 0,
    })
}

/// Reads a numeric vector stored as one column or one row.
pub fn read_vector(path: &Path) -> Result<Array1<f64>, DataError> {
    let (values, rows, cols) = parse_numeric::<f64>(path)?;
    if rows != 1 && cols != 1 {
        return Err(DataError::NotAVector {
            path: path.display().to_string(),
            rows,
            cols,
        });
    }
    Ok(Array1::from(values))
}

/// Reads integer group labels stored as one column or one row.
pub fn read_groups(path: &Path) -> Result<Vec<i64>, DataError> {
    let (values, rows, cols) = parse_numeric::<i64>(path)?;
    if rows != 1 && cols != 1 {
        return Err(DataError::NotAVector {
            path: path.display().to_string(),
            rows,
            cols,
        });
    }
    Ok(values)
}

/// Writes a numeric matrix as comma-separated text.
pub fn write_matrix(path: &Path, matrix: &Array2<f64>) -> Result<(), DataError> {
    let io_error = |source| DataError::Io {
        path: path.display().to_string(),
        source,
    };
    let mut out = BufWriter::new(File::create(path).map_err(io_error)?);
    let mut buffer = ryu::Buffer::new();
    for row in matrix.rows() {
        let mut line = String::with_capacity(row.len() * 12);
        for (j, value) in row.iter().enumerate() {
            if j > 0 {
                line.push(',');
            }
            line.push_str(buffer.format(*value));
        }
        line.push('\n');
        out.write_all(line.as_bytes()).map_err(io_error)?;
    }
    out.flush().map_err(io_error)
}

/// Writes one line per feature: its index followed by each named column.
pub fn write_feature_table(
    path: &Path,
    columns: &[(&str, ArrayView1<f64>)],
) -> Result<(), DataError> {
    let n_rows = columns.first().map_or(0, |(_, values)| values.len());
    if columns.iter().any(|(_, values)| values.len() != n_rows) {
        let lengths = columns
            .iter()
            .map(|(name, values)| format!("{name}={}", values.len()))
            .join(", ");
        return Err(DataError::ColumnLengths(lengths));
    }

    let io_error = |source| DataError::Io {
        path: path.display().to_string(),
        source,
    };
    let mut out = BufWriter::new(File::create(path).map_err(io_error)?);
    let header = format!(
        "feature\t{}\n",
        columns.iter().map(|(name, _)| name).join("\t")
    );
    out.write_all(header.as_bytes()).map_err(io_error)?;

    let mut buffer = ryu::Buffer::new();
    for i in 0..n_rows {
        let mut line = i.to_string();
        for (_, values) in columns {
            line.push('\t');
            line.push_str(buffer.format(values[i]));
        }
        line.push('\n');
        out.write_all(line.as_bytes()).map_err(io_error)?;
    }
    out.flush().map_err(io_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn matrix_with_header_is_parsed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.csv");
        fs::write(&path, "a,b,c\n1,2,3\n4.5,-1e-3,0\n").unwrap();
        let x = read_matrix(&path).unwrap();
        assert_eq!(x, array![[1.0, 2.0, 3.0], [4.5, -1e-3, 0.0]]);
    }

    #[test]
    fn tab_separated_vector_row() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("y.tsv");
        fs::write(&path, "1\t2\t3\n").unwrap();
        assert_eq!(read_vector(&path).unwrap(), array![1.0, 2.0, 3.0]);
    }

    #[test]
    fn group_labels_are_integers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("groups.csv");
        fs::write(&path, "group\n3\n3\n-1\n").unwrap();
        assert_eq!(read_groups(&path).unwrap(), vec![3, 3, -1]);
    }

    #[test]
    fn ragged_rows_are_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "1,2\n3\n").unwrap();
        assert!(matches!(
            read_matrix(&path),
            Err(DataError::Ragged { line: 2, expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn non_numeric_cell_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "1,2\n3,x\n").unwrap();
        assert!(matches!(
            read_matrix(&path),
            Err(DataError::Parse { line: 2, column: 2, .. })
        ));
    }

    #[test]
    fn corrupted_first_row_is_not_a_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "1.0,abc,3\n4,5,6\n").unwrap();
        assert!(matches!(
            read_matrix(&path),
            Err(DataError::Parse { line: 1, column: 2, ref value, .. }) if value == "abc"
        ));
    }

    #[test]
    fn errors_after_a_header_report_file_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "a,b\n1,2\n3,x\n").unwrap();
        assert!(matches!(
            read_matrix(&path),
            Err(DataError::Parse { line: 3, column: 2, .. })
        ));

        fs::write(&path, "a,b\n1,2\n\n3\n").unwrap();
        assert!(matches!(
            read_matrix(&path),
            Err(DataError::Ragged { line: 4, expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn matrix_round_trips_through_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.csv");
        let matrix = array![[0.1, -2.5], [1e-300, 3.0]];
        write_matrix(&path, &matrix).unwrap();
        assert_eq!(read_matrix(&path).unwrap(), matrix);
    }

    #[test]
    fn feature_table_has_header_and_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.tsv");
        let beta = array![0.5, -1.0];
        let pval = array![0.01, 0.5];
        write_feature_table(&path, &[("beta_hat", beta.view()), ("pval", pval.view())]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "feature\tbeta_hat\tpval");
        assert_eq!(lines[1], "0\t0.5\t0.01");
        assert_eq!(lines[2], "1\t-1.0\t0.5");
    }

    #[test]
    fn mismatched_columns_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.tsv");
        let a = array![1.0];
        let b = array![1.0, 2.0];
        assert!(matches!(
            write_feature_table(&path, &[("a", a.view()), ("b", b.view())]),
            Err(DataError::ColumnLengths(_))
        ));
    }
}
