//! Delimited-text reading and writing for count matrices, depth, and outputs

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use ::csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use ndarray::{Array1, Array2};

use crate::data::{CountMatrix, NormalizedMatrix};
use crate::error::{DinoError, Result};

/// Tab if the header line contains one, comma otherwise
fn detect_delimiter(content: &str) -> u8 {
    let header = content.lines().next().unwrap_or("");
    if header.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

fn records(content: &str, has_headers: bool) -> ::csv::Reader<&[u8]> {
    ReaderBuilder::new()
        .delimiter(detect_delimiter(content))
        .has_headers(has_headers)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes())
}

/// Read a genes × cells count matrix.
///
/// Expected format: header row of cell IDs (the first header cell is ignored), then one
/// row per gene with the gene ID first. CSV and TSV are auto-detected; quoted fields
/// are unquoted.
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Err(DinoError::EmptyData {
            reason: "Empty count file".to_string(),
        });
    }

    let mut reader = records(&content, true);
    let header = reader.headers()?.clone();
    if header.len() < 2 {
        return Err(DinoError::InvalidCountMatrix {
            reason: "Not enough columns in header".to_string(),
        });
    }
    let cell_ids: Vec<String> = header.iter().skip(1).map(str::to_string).collect();
    let n_cells = cell_ids.len();

    let mut gene_ids = Vec::new();
    let mut values = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        if record.len() != n_cells + 1 {
            return Err(DinoError::InvalidCountMatrix {
                reason: format!(
                    "Row {} has {} columns, expected {}",
                    line + 2,
                    record.len(),
                    n_cells + 1
                ),
            });
        }
        gene_ids.push(record[0].to_string());
        for field in record.iter().skip(1) {
            let v = field.parse::<f64>().map_err(|_| DinoError::InvalidCountMatrix {
                reason: format!("Invalid count value '{}' for gene {}", field, &record[0]),
            })?;
            values.push(v);
        }
    }

    if gene_ids.is_empty() {
        return Err(DinoError::EmptyData {
            reason: "No genes found in count matrix".to_string(),
        });
    }

    let counts = Array2::from_shape_vec((gene_ids.len(), n_cells), values).map_err(|e| {
        DinoError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    CountMatrix::new(counts, gene_ids, cell_ids)
}

fn parse_depth_row(record: &StringRecord) -> Option<(String, Option<f64>)> {
    if record.len() < 2 || record[0].is_empty() {
        return None;
    }
    Some((record[0].to_string(), record[1].parse::<f64>().ok()))
}

/// Read per-cell depth values and order them like `cell_ids`.
///
/// Rows are `cell_id, value`; a leading header row is recognized by its non-numeric
/// value. Every cell in `cell_ids` must be present exactly once. Values are returned
/// as written (linear or log, as the caller declares).
pub fn read_depth<P: AsRef<Path>>(path: P, cell_ids: &[String]) -> Result<Vec<f64>> {
    let content = fs::read_to_string(path)?;
    let mut reader = records(&content, false);

    let mut by_cell: HashMap<String, f64> = HashMap::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let Some((cell, value)) = parse_depth_row(&record) else {
            continue;
        };
        let value = match value {
            Some(v) => v,
            None if line == 0 => continue,
            None => {
                return Err(DinoError::InvalidDepth {
                    reason: format!("Invalid depth value '{}' for cell {}", &record[1], cell),
                })
            }
        };
        if by_cell.insert(cell.clone(), value).is_some() {
            return Err(DinoError::InvalidDepth {
                reason: format!("Duplicate depth entry for cell {}", cell),
            });
        }
    }

    let depth = cell_ids
        .iter()
        .map(|id| {
            by_cell.get(id).copied().ok_or_else(|| DinoError::InvalidDepth {
                reason: format!("No depth value for cell {}", id),
            })
        })
        .collect::<Result<Vec<f64>>>()?;

    if by_cell.len() > cell_ids.len() {
        log::warn!(
            "Depth file has {} entries for cells not in the count matrix; ignored",
            by_cell.len() - cell_ids.len()
        );
    }
    Ok(depth)
}

/// Write the normalized matrix as TSV with gene rows and cell columns
pub fn write_normalized<P: AsRef<Path>>(path: P, matrix: &NormalizedMatrix) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;

    let mut header = vec!["gene_id".to_string()];
    header.extend(matrix.cell_ids().iter().cloned());
    writer.write_record(&header)?;

    for (g, gene_id) in matrix.gene_ids().iter().enumerate() {
        let mut row = Vec::with_capacity(matrix.n_cells() + 1);
        row.push(gene_id.clone());
        row.extend(matrix.gene_values(g).iter().map(|v| v.to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write per-cell depth as a two-column TSV
pub fn write_depth<P: AsRef<Path>>(path: P, cell_ids: &[String], depth: &Array1<f64>) -> Result<()> {
    if cell_ids.len() != depth.len() {
        return Err(DinoError::DimensionMismatch {
            expected: format!("{} depth values", cell_ids.len()),
            got: format!("{} depth values", depth.len()),
        });
    }
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(["cell_id", "depth"])?;
    for (id, d) in cell_ids.iter().zip(depth.iter()) {
        let value = d.to_string();
        writer.write_record([id.as_str(), value.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_read_count_matrix_tsv() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_id\tc1\tc2\tc3").unwrap();
        writeln!(file, "gene1\t1\t0\t5").unwrap();
        writeln!(file, "gene2\t0\t7\t2").unwrap();

        let matrix = read_count_matrix(file.path()).unwrap();
        assert_eq!(matrix.n_genes(), 2);
        assert_eq!(matrix.n_cells(), 3);
        assert_eq!(matrix.cell_ids(), &ids(&["c1", "c2", "c3"])[..]);
        assert_eq!(matrix.counts()[[1, 1]], 7.0);
    }

    #[test]
    fn test_read_count_matrix_quoted_csv() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "\"\",\"c1\",\"c2\"").unwrap();
        writeln!(file, "\"g1\",3,4").unwrap();

        let matrix = read_count_matrix(file.path()).unwrap();
        assert_eq!(matrix.gene_ids(), &ids(&["g1"])[..]);
        assert_eq!(matrix.cell_ids(), &ids(&["c1", "c2"])[..]);
    }

    #[test]
    fn test_read_count_matrix_ragged_row() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_id,c1,c2").unwrap();
        writeln!(file, "g1,3").unwrap();
        assert!(matches!(
            read_count_matrix(file.path()),
            Err(DinoError::InvalidCountMatrix { .. })
        ));
    }

    #[test]
    fn test_read_depth_reorders_to_cells() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "cell\tdepth").unwrap();
        writeln!(file, "c3\t1.5").unwrap();
        writeln!(file, "c1\t0.5").unwrap();
        writeln!(file, "c2\t1.0").unwrap();

        let depth = read_depth(file.path(), &ids(&["c1", "c2", "c3"])).unwrap();
        assert_eq!(depth, vec![0.5, 1.0, 1.5]);
    }

    #[test]
    fn test_read_depth_missing_cell() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "c1,0.5").unwrap();
        assert!(matches!(
            read_depth(file.path(), &ids(&["c1", "c2"])),
            Err(DinoError::InvalidDepth { .. })
        ));
    }

    #[test]
    fn test_write_normalized_round_trip_ids() {
        let matrix = NormalizedMatrix::new(
            ndarray::array![[0.0, 1.25], [3.5, 0.0]],
            ids(&["g1", "g2"]),
            ids(&["c1", "c2"]),
            false,
        )
        .unwrap();
        let file = NamedTempFile::new().unwrap();
        write_normalized(file.path(), &matrix).unwrap();

        let text = fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "gene_id\tc1\tc2");
        assert_eq!(lines[1], "g1\t0\t1.25");
        assert_eq!(lines[2], "g2\t3.5\t0");
    }

    #[test]
    fn test_write_depth() {
        let file = NamedTempFile::new().unwrap();
        write_depth(file.path(), &ids(&["a", "b"]), &Array1::from(vec![0.5, 2.0])).unwrap();
        let back = read_depth(file.path(), &ids(&["b", "a"])).unwrap();
        assert_eq!(back, vec![2.0, 0.5]);
    }
}
