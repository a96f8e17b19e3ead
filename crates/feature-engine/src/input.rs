//! Tabular upload parsing

use crate::error::FeatureError;
use crate::record::RawInputRecord;
use std::io::Read;
use tracing::debug;

/// Parse a CSV upload into one record per row.
///
/// The header row names the fields. Empty cells are missing values. A row
/// with a non-numeric cell becomes an error for that row only.
pub fn parse_csv<R: Read>(reader: R) -> Result<Vec<Result<RawInputRecord, FeatureError>>, FeatureError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| FeatureError::InvalidInput(format!("Failed to read CSV header: {}", e)))?
        .clone();

    if headers.is_empty() {
        return Err(FeatureError::InvalidInput("CSV header is empty".to_string()));
    }

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let row = line + 1;
        let parsed = record
            .map_err(|e| FeatureError::InvalidInput(format!("row {}: {}", row, e)))
            .and_then(|record| {
                let mut raw = RawInputRecord::new();
                for (name, cell) in headers.iter().zip(record.iter()) {
                    if cell.is_empty() {
                        raw.insert(name, None::<f64>);
                        continue;
                    }
                    let value = cell.parse::<f64>().map_err(|_| {
                        FeatureError::InvalidInput(format!(
                            "row {}: column '{}' value '{}' is not numeric",
                            row, name, cell
                        ))
                    })?;
                    raw.insert(name, value);
                }
                Ok(raw)
            });
        rows.push(parsed);
    }

    debug!("Parsed {} CSV rows", rows.len());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rows() {
        let data = "sim_age_days,loan_count_30d,total_loan_amt_30d\n\
                    120, 2 ,12\n\
                    300,,6\n";
        let rows = parse_csv(data.as_bytes()).unwrap();

        assert_eq!(rows.len(), 2);
        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.get("loan_count_30d"), Some(2.0));
        let second = rows[1].as_ref().unwrap();
        assert_eq!(second.get("loan_count_30d"), None);
        assert_eq!(second.get("total_loan_amt_30d"), Some(6.0));
    }

    #[test]
    fn test_bad_cell_fails_only_its_row() {
        let data = "sim_age_days,loan_count_30d\n10,1\nabc,2\n30,3\n";
        let rows = parse_csv(data.as_bytes()).unwrap();

        assert!(rows[0].is_ok());
        match &rows[1] {
            Err(FeatureError::InvalidInput(msg)) => assert!(msg.contains("row 2")),
            other => panic!("expected row error, got {:?}", other),
        }
        assert!(rows[2].is_ok());
    }

    #[test]
    fn test_ragged_row_is_row_error() {
        let data = "a,b\n1,2\n1,2,3\n";
        let rows = parse_csv(data.as_bytes()).unwrap();
        assert!(rows[0].is_ok());
        assert!(rows[1].is_err());
    }
}
