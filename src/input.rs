use crate::cutsite::{CutSiteRequest, InputSchema, COL_CHR, COL_COORDINATE, COL_REF};
use anyhow::{anyhow, Result};
use csv::ReaderBuilder;
use std::fs::File;

/// The parsed input batch: header, the schema decided from it, and the rows in
/// input order.
#[derive(Debug, Clone)]
pub struct InputTable {
    headers: Vec<String>,
    schema: InputSchema,
    rows: Vec<CutSiteRequest>,
}

impl InputTable {
    pub fn from_csv_path(path: &str) -> Result<Self> {
        let file =
            File::open(path).map_err(|e| anyhow!("Could not read input csv '{path}': {e}"))?;
        let mut rdr = ReaderBuilder::new().flexible(true).from_reader(file);

        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| anyhow!("Could not parse header of '{path}': {e}"))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let schema = InputSchema::detect(&headers)?;

        let mut rows = vec![];
        for record in rdr.records() {
            let record = record.map_err(|e| anyhow!("Bad CSV line in '{path}': {e}"))?;
            let mut columns: Vec<String> = record.iter().map(|f| f.to_string()).collect();
            // Short rows are padded so column indices from the schema stay valid.
            while columns.len() < headers.len() {
                columns.push(String::new());
            }
            rows.push(CutSiteRequest::new(columns));
        }

        Ok(Self {
            headers,
            schema,
            rows,
        })
    }

    /// Accepts a literal `genome,chromosome,coordinate` triple in place of a file.
    pub fn from_oneliner(oneliner: &str) -> Result<Self> {
        let fields: Vec<String> = oneliner.split(',').map(|f| f.trim().to_string()).collect();
        if fields.len() != 3 {
            return Err(anyhow!(
                "one-liner input must be 'ref,chr,coordinate', got '{oneliner}'"
            ));
        }
        let headers: Vec<String> = [COL_REF, COL_CHR, COL_COORDINATE]
            .iter()
            .map(|h| h.to_string())
            .collect();
        let schema = InputSchema::detect(&headers)?;
        Ok(Self {
            headers,
            schema,
            rows: vec![CutSiteRequest::new(fields)],
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn schema(&self) -> &InputSchema {
        &self.schema
    }

    pub fn rows(&self) -> &[CutSiteRequest] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_from_csv_path_explicit_schema() {
        let td = tempdir().unwrap();
        let path = td.path().join("sites.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "Entry,ref,chr,coordinate").unwrap();
        writeln!(file, "site-1,GRCh38,1,1000000").unwrap();
        writeln!(file, "site-2,GRCh38,2,2000000").unwrap();
        drop(file);

        let table = InputTable::from_csv_path(&path.to_string_lossy()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.headers()[0], "Entry");
        assert!(matches!(table.schema(), InputSchema::Explicit { .. }));
        assert_eq!(table.rows()[1].columns[3], "2000000");
    }

    #[test]
    fn test_short_rows_are_padded() {
        let td = tempdir().unwrap();
        let path = td.path().join("sites.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "ref,chr,coordinate,Entry").unwrap();
        writeln!(file, "GRCh38,1,1000000").unwrap();
        drop(file);

        let table = InputTable::from_csv_path(&path.to_string_lossy()).unwrap();
        assert_eq!(table.rows()[0].columns.len(), 4);
        assert_eq!(table.rows()[0].columns[3], "");
    }

    #[test]
    fn test_from_oneliner() {
        let table = InputTable::from_oneliner("ensembl_GRCh38_latest,20,17482068").unwrap();
        assert_eq!(table.len(), 1);
        assert!(matches!(table.schema(), InputSchema::Explicit { .. }));
        assert_eq!(table.rows()[0].columns[2], "17482068");
    }

    #[test]
    fn test_from_oneliner_rejects_wrong_arity() {
        assert!(InputTable::from_oneliner("GRCh38,1").is_err());
    }

    #[test]
    fn test_missing_columns_rejected() {
        let td = tempdir().unwrap();
        let path = td.path().join("bad.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "name,value").unwrap();
        writeln!(file, "a,1").unwrap();
        drop(file);
        assert!(InputTable::from_csv_path(&path.to_string_lossy()).is_err());
    }
}
