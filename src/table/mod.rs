//! Columnar catalog engine
//!
//! Tables are immutable after construction. Clients work through
//! [`TableView`] projections, which share the table behind a reference
//! count and carry only an index list.

pub mod columns;
pub mod controller;
pub mod fits;
pub mod view;
pub mod votable;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{Error, Result};

pub use columns::{Column, ColumnType, ColumnValues, ComparisonOperator, Entries, IndexList};
pub use view::TableView;

/// Catalog file formats the engine can ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFileType {
    VoTable,
    FitsTable,
    Csv,
}

impl CatalogFileType {
    pub fn name(&self) -> &'static str {
        match self {
            CatalogFileType::VoTable => "VOTable",
            CatalogFileType::FitsTable => "FITS table",
            CatalogFileType::Csv => "CSV",
        }
    }
}

/// An immutable columnar catalog.
///
/// Columns are addressable by position, by name, and by ID; the name and
/// ID namespaces are distinct.
pub struct Table {
    columns: Vec<Column>,
    name_index: HashMap<String, usize>,
    id_index: HashMap<String, usize>,
    num_rows: usize,
    description: String,
    file_type: CatalogFileType,
}

impl Table {
    pub fn new(
        columns: Vec<Column>,
        num_rows: usize,
        description: String,
        file_type: CatalogFileType,
    ) -> Result<Self> {
        for column in &columns {
            let entries = column.num_entries();
            if column.data_type() != ColumnType::Unsupported && entries != num_rows {
                return Err(Error::Invariant(format!(
                    "column \"{}\" has {} entries for a table of {} rows",
                    column.name, entries, num_rows
                )));
            }
        }

        let mut name_index = HashMap::new();
        let mut id_index = HashMap::new();
        for (position, column) in columns.iter().enumerate() {
            if !column.name.is_empty() {
                name_index.entry(column.name.clone()).or_insert(position);
            }
            if !column.id.is_empty() {
                id_index.entry(column.id.clone()).or_insert(position);
            }
        }

        Ok(Self {
            columns,
            name_index,
            id_index,
            num_rows,
            description,
            file_type,
        })
    }

    /// Opens a catalog file, detecting its format from the leading bytes
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::ResourceMissing(format!(
                "cannot find path {}",
                path.display()
            )));
        }

        match detect_file_type(path)? {
            CatalogFileType::VoTable => {
                let reader = BufReader::new(File::open(path)?);
                let (columns, num_rows, description) = votable::parse_votable(reader)?;
                Table::new(columns, num_rows, description, CatalogFileType::VoTable)
            }
            CatalogFileType::FitsTable => {
                let mut data = Vec::new();
                File::open(path)?.read_to_end(&mut data)?;
                let (columns, num_rows, description) = fits::parse_binary_table(&data)?;
                Table::new(columns, num_rows, description, CatalogFileType::FitsTable)
            }
            CatalogFileType::Csv => Table::from_csv_file(path),
        }
    }

    /// Builds a table of string columns from a CSV file with a header row
    pub fn from_csv_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| Error::InvalidFormat(format!("CSV: {}", e)))?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| Error::InvalidFormat(format!("CSV: {}", e)))?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut values: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record.map_err(|e| Error::InvalidFormat(format!("CSV: {}", e)))?;
            for (i, column) in values.iter_mut().enumerate() {
                column.push(record.get(i).unwrap_or("").to_string());
            }
        }

        Table::from_string_columns(headers, values, CatalogFileType::Csv)
    }

    /// Builds a table from raw string columns
    pub fn from_string_columns(
        names: Vec<String>,
        values: Vec<Vec<String>>,
        file_type: CatalogFileType,
    ) -> Result<Self> {
        if names.len() != values.len() {
            return Err(Error::InvalidParameter(format!(
                "{} column names for {} value columns",
                names.len(),
                values.len()
            )));
        }

        let num_rows = values.first().map(|v| v.len()).unwrap_or(0);
        let columns = names
            .into_iter()
            .zip(values)
            .map(|(name, column_values)| Column::from_strings(&name, column_values))
            .collect();

        Table::new(columns, num_rows, String::new(), file_type)
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn file_type(&self) -> CatalogFileType {
        self.file_type
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.name_index.get(name).map(|&i| &self.columns[i])
    }

    pub fn column_by_id(&self, id: &str) -> Option<&Column> {
        self.id_index.get(id).map(|&i| &self.columns[i])
    }

    /// Looks a column up by name, falling back to the ID namespace
    pub fn get_column(&self, name_or_id: &str) -> Option<&Column> {
        self.column_by_name(name_or_id)
            .or_else(|| self.column_by_id(name_or_id))
    }
}

fn detect_file_type(path: &Path) -> Result<CatalogFileType> {
    let mut header = [0u8; 16];
    let mut file = File::open(path)?;
    let read = file.read(&mut header)?;
    let header = &header[..read];

    if header.starts_with(b"SIMPLE") {
        return Ok(CatalogFileType::FitsTable);
    }
    if header.starts_with(b"<?xml") || header.starts_with(b"<VOTABLE") {
        return Ok(CatalogFileType::VoTable);
    }
    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")) {
        return Ok(CatalogFileType::Csv);
    }

    Err(Error::InvalidFormat(format!(
        "{} is not a recognized catalog format",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_table_lookup_namespaces() {
        let mut column = Column::from_strings("name", vec!["x".to_string()]);
        column.id = "col0".to_string();
        let table = Table::new(vec![column], 1, String::new(), CatalogFileType::Csv).unwrap();

        assert!(table.column_by_name("name").is_some());
        assert!(table.column_by_id("col0").is_some());
        assert!(table.column_by_name("col0").is_none());
        assert!(table.get_column("col0").is_some());
    }

    #[test]
    fn test_table_rejects_ragged_columns() {
        let a = Column::from_strings("a", vec!["1".to_string(), "2".to_string()]);
        let b = Column::from_strings("b", vec!["1".to_string()]);
        assert!(Table::new(vec![a, b], 2, String::new(), CatalogFileType::Csv).is_err());
    }

    #[test]
    fn test_from_string_columns() {
        let table = Table::from_string_columns(
            vec!["a".to_string(), "b".to_string()],
            vec![
                vec!["1".to_string(), "2".to_string()],
                vec!["x".to_string(), "y".to_string()],
            ],
            CatalogFileType::Csv,
        )
        .unwrap();

        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.num_columns(), 2);
    }

    #[test]
    fn test_open_csv_file() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "name,flux").unwrap();
        writeln!(file, "alpha,1.5").unwrap();
        writeln!(file, "beta,2.5").unwrap();
        file.flush().unwrap();

        let table = Table::open_file(file.path()).unwrap();
        assert_eq!(table.file_type(), CatalogFileType::Csv);
        assert_eq!(table.num_rows(), 2);
        assert!(table.column_by_name("flux").is_some());
    }

    #[test]
    fn test_open_missing_file() {
        assert!(matches!(
            Table::open_file("/nonexistent/catalog.xml"),
            Err(Error::ResourceMissing(_))
        ));
    }

    #[test]
    fn test_unknown_format_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"garbage bytes").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            Table::open_file(file.path()),
            Err(Error::InvalidFormat(_))
        ));
    }
}
