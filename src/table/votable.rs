//! VOTable catalog parsing
//!
//! Streams FIELD declarations and TABLEDATA rows out of a VOTable XML
//! document. Array-valued fields other than char strings are admitted as
//! unsupported columns so the header stays complete.

use std::io::Read;

use xml::attribute::OwnedAttribute;
use xml::reader::{EventReader, XmlEvent};

use crate::error::{Error, Result};
use crate::table::columns::{Column, ColumnType};

fn column_from_field(attributes: &[OwnedAttribute]) -> Column {
    let mut name = String::new();
    let mut id = String::new();
    let mut datatype = String::new();
    let mut array_size = String::new();
    let mut unit = String::new();
    let mut ucd = String::new();
    let mut description = String::new();

    for attribute in attributes {
        let value = attribute.value.clone();
        match attribute.name.local_name.as_str() {
            "name" => name = value,
            "ID" => id = value,
            "datatype" => datatype = value,
            "arraysize" => array_size = value,
            "unit" => unit = value,
            "ucd" => ucd = value,
            "description" => description = value,
            _ => {}
        }
    }

    let data_type = match datatype.as_str() {
        "char" | "unicodeChar" => ColumnType::String,
        // Can't support array-based column types other than char
        _ if !array_size.is_empty() => ColumnType::Unsupported,
        "int" => ColumnType::Int32,
        "short" => ColumnType::Int16,
        "unsignedByte" => ColumnType::Uint8,
        "long" => ColumnType::Int64,
        "float" => ColumnType::Float,
        "double" => ColumnType::Double,
        "boolean" => ColumnType::Bool,
        _ => ColumnType::Unsupported,
    };

    let mut column = Column::new(&name, data_type);
    column.id = id;
    column.unit = unit;
    column.ucd = ucd;
    column.description = description;
    column
}

/// Parses a VOTable document into columns, a row count, and the table
/// description
pub fn parse_votable<R: Read>(source: R) -> Result<(Vec<Column>, usize, String)> {
    let parser = EventReader::new(source);

    let mut columns: Vec<Column> = Vec::new();
    let mut table_description = String::new();
    let mut num_rows = 0;

    let mut in_field = false;
    let mut in_description = false;
    let mut in_td = false;
    let mut seen_tabledata = false;
    let mut td_index = 0;
    let mut text = String::new();

    for event in parser {
        let event = event.map_err(|e| Error::InvalidFormat(format!("VOTable: {}", e)))?;
        match event {
            XmlEvent::StartElement {
                name, attributes, ..
            } => match name.local_name.as_str() {
                "FIELD" => {
                    columns.push(column_from_field(&attributes));
                    in_field = true;
                }
                "DESCRIPTION" => {
                    in_description = true;
                    text.clear();
                }
                "TABLEDATA" => seen_tabledata = true,
                "TR" => td_index = 0,
                "TD" => {
                    in_td = true;
                    text.clear();
                }
                _ => {}
            },
            XmlEvent::Characters(data) | XmlEvent::CData(data) => {
                if in_td || in_description {
                    text.push_str(&data);
                }
            }
            XmlEvent::Whitespace(data) => {
                if in_td {
                    text.push_str(&data);
                }
            }
            XmlEvent::EndElement { name } => match name.local_name.as_str() {
                "FIELD" => in_field = false,
                "DESCRIPTION" => {
                    in_description = false;
                    let trimmed = text.trim();
                    if in_field {
                        // Element form wins over the description attribute
                        if let Some(column) = columns.last_mut() {
                            column.description = trimmed.to_string();
                        }
                    } else if table_description.is_empty() {
                        table_description = trimmed.to_string();
                    }
                    text.clear();
                }
                "TD" => {
                    if td_index < columns.len() {
                        columns[td_index].push_text(&text);
                    }
                    td_index += 1;
                    in_td = false;
                }
                "TR" => {
                    if seen_tabledata {
                        while td_index < columns.len() {
                            columns[td_index].push_empty();
                            td_index += 1;
                        }
                        num_rows += 1;
                    }
                }
                "TABLEDATA" => break,
                _ => {}
            },
            _ => {}
        }
    }

    if columns.is_empty() {
        return Err(Error::InvalidFormat(
            "VOTable: no FIELD definitions found".to_string(),
        ));
    }

    Ok((columns, num_rows, table_description))
}
