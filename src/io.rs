// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1};

use crate::error::{InversionError, Result};

/// Lines starting with this character are comments in text files.
pub const COMMENT_MARKER: char = '#';

/// Supported file formats for vector and matrix I/O.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    /// Plain text: one value per line for vectors, one row per line for matrices.
    Text,
    /// NumPy .npy format.
    Npy,
}

/// Infer file format from extension.
pub fn infer_format(path: &Path) -> Result<FileFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("txt") | Some("dat") | Some("lst") => Ok(FileFormat::Text),
        Some("npy") => Ok(FileFormat::Npy),
        Some(ext) => Err(InversionError::UnsupportedFileFormat(ext.to_string())),
        None => Err(InversionError::UnsupportedFileFormat(
            "(no extension)".to_string(),
        )),
    }
}

/// Write a vector as text, one value per line.
pub fn write_vector(path: &Path, v: ArrayView1<'_, f64>) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "{} {} values", COMMENT_MARKER, v.len())?;
    for x in v.iter() {
        writeln!(w, "{}", x)?;
    }
    w.flush()?;
    Ok(())
}

/// Read a text vector written by [`write_vector`].
pub fn read_vector(path: &Path) -> Result<Array1<f64>> {
    let mut values = Vec::new();
    for (line_no, fields) in data_lines(path)? {
        if fields.len() != 1 {
            return Err(InversionError::Parse {
                line: line_no,
                reason: format!("expected one value, found {}", fields.len()),
            });
        }
        values.push(parse_value(line_no, &fields[0])?);
    }
    Ok(Array1::from_vec(values))
}

/// Write a matrix as text, one whitespace-separated row per line.
pub fn write_matrix(path: &Path, m: &Array2<f64>) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "{} {} x {}", COMMENT_MARKER, m.nrows(), m.ncols())?;
    for row in m.rows() {
        let line: Vec<String> = row.iter().map(|x| x.to_string()).collect();
        writeln!(w, "{}", line.join(" "))?;
    }
    w.flush()?;
    Ok(())
}

/// Read a text matrix written by [`write_matrix`].
pub fn read_matrix(path: &Path) -> Result<Array2<f64>> {
    let mut data = Vec::new();
    let mut rows = 0;
    let mut cols = None;
    for (line_no, fields) in data_lines(path)? {
        match cols {
            None => cols = Some(fields.len()),
            Some(c) if c != fields.len() => {
                return Err(InversionError::Parse {
                    line: line_no,
                    reason: format!("expected {} columns, found {}", c, fields.len()),
                })
            }
            Some(_) => {}
        }
        for f in &fields {
            data.push(parse_value(line_no, f)?);
        }
        rows += 1;
    }
    Array2::from_shape_vec((rows, cols.unwrap_or(0)), data)
        .map_err(|e| InversionError::Other(format!("shape error: {}", e)))
}

/// Save a matrix to a .npy file.
pub fn save_npy_matrix(path: &Path, m: &Array2<f64>) -> Result<()> {
    ndarray_npy::write_npy(path, m)
        .map_err(|e| InversionError::Other(format!("failed to write npy: {}", e)))
}

/// Load a matrix from a .npy file, promoting f32 data to f64.
pub fn load_npy_matrix(path: &Path) -> Result<Array2<f64>> {
    match ndarray_npy::read_npy::<_, Array2<f64>>(path) {
        Ok(m) => Ok(m),
        Err(_) => {
            let m32: Array2<f32> = ndarray_npy::read_npy(path)
                .map_err(|e| InversionError::Other(format!("failed to read npy: {}", e)))?;
            Ok(m32.mapv(|v| v as f64))
        }
    }
}

/// Save a matrix, inferring format from extension.
pub fn save_matrix(path: &Path, m: &Array2<f64>) -> Result<()> {
    match infer_format(path)? {
        FileFormat::Text => write_matrix(path, m),
        FileFormat::Npy => save_npy_matrix(path, m),
    }
}

/// Load a matrix, inferring format from extension.
pub fn load_matrix(path: &Path) -> Result<Array2<f64>> {
    match infer_format(path)? {
        FileFormat::Text => read_matrix(path),
        FileFormat::Npy => load_npy_matrix(path),
    }
}

/// Save a vector, inferring format from extension.
pub fn save_vector(path: &Path, v: ArrayView1<'_, f64>) -> Result<()> {
    match infer_format(path)? {
        FileFormat::Text => write_vector(path, v),
        FileFormat::Npy => ndarray_npy::write_npy(path, &v)
            .map_err(|e| InversionError::Other(format!("failed to write npy: {}", e))),
    }
}

/// Load a vector, inferring format from extension.
pub fn load_vector(path: &Path) -> Result<Array1<f64>> {
    match infer_format(path)? {
        FileFormat::Text => read_vector(path),
        FileFormat::Npy => ndarray_npy::read_npy(path)
            .map_err(|e| InversionError::Other(format!("failed to read npy: {}", e))),
    }
}

/// Non-blank, non-comment lines split on whitespace, with 1-based line numbers.
fn data_lines(path: &Path) -> Result<Vec<(usize, Vec<String>)>> {
    let reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(COMMENT_MARKER) {
            continue;
        }
        out.push((
            i + 1,
            trimmed.split_whitespace().map(str::to_string).collect(),
        ));
    }
    Ok(out)
}

fn parse_value(line: usize, s: &str) -> Result<f64> {
    s.parse::<f64>().map_err(|e| InversionError::Parse {
        line,
        reason: format!("'{}': {}", s, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn text_vector_roundtrip() {
        let v = array![1.5, -2.25e-12, 3.0, 0.1];
        let tmp = std::env::temp_dir().join("tomo_test_vector.txt");
        write_vector(&tmp, v.view()).unwrap();
        let loaded = read_vector(&tmp).unwrap();
        assert_eq!(loaded, v);
        std::fs::remove_file(&tmp).ok();
    }

    #[test]
    fn text_matrix_roundtrip() {
        let m = array![[1.0, 2.0, 3.0], [4.0, 5.5, -6.0]];
        let tmp = std::env::temp_dir().join("tomo_test_matrix.txt");
        save_matrix(&tmp, &m).unwrap();
        assert_eq!(load_matrix(&tmp).unwrap(), m);
        std::fs::remove_file(&tmp).ok();
    }

    #[test]
    fn comments_and_blank_lines_skipped() {
        let tmp = std::env::temp_dir().join("tomo_test_comments.txt");
        std::fs::write(&tmp, "# header\n1 2\n\n# middle\n3 4\n").unwrap();
        assert_eq!(read_matrix(&tmp).unwrap(), array![[1.0, 2.0], [3.0, 4.0]]);
        std::fs::remove_file(&tmp).ok();
    }

    #[test]
    fn ragged_matrix_rejected() {
        let tmp = std::env::temp_dir().join("tomo_test_ragged.txt");
        std::fs::write(&tmp, "1 2\n3\n").unwrap();
        assert!(matches!(
            read_matrix(&tmp),
            Err(InversionError::Parse { line: 2, .. })
        ));
        std::fs::remove_file(&tmp).ok();
    }

    #[test]
    fn bad_number_rejected() {
        let tmp = std::env::temp_dir().join("tomo_test_bad_number.txt");
        std::fs::write(&tmp, "1.0\nabc\n").unwrap();
        assert!(matches!(
            read_vector(&tmp),
            Err(InversionError::Parse { line: 2, .. })
        ));
        std::fs::remove_file(&tmp).ok();
    }

    #[test]
    fn npy_matrix_roundtrip() {
        let m = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let tmp = std::env::temp_dir().join("tomo_test_matrix.npy");
        save_matrix(&tmp, &m).unwrap();
        assert_eq!(load_matrix(&tmp).unwrap(), m);
        std::fs::remove_file(&tmp).ok();
    }

    #[test]
    fn npy_vector_roundtrip() {
        let v = array![1.0, -1.0, 0.5];
        let tmp = std::env::temp_dir().join("tomo_test_vector.npy");
        save_vector(&tmp, v.view()).unwrap();
        assert_eq!(load_vector(&tmp).unwrap(), v);
        std::fs::remove_file(&tmp).ok();
    }

    #[test]
    fn unsupported_format() {
        let path = Path::new("test.xyz");
        let result = infer_format(path);
        assert!(matches!(
            result,
            Err(InversionError::UnsupportedFileFormat(_))
        ));
    }
}
