//! FITS binary table parsing
//!
//! Reads the 80-character header cards of each HDU until a BINTABLE
//! extension is found, then decodes its big-endian row buffer into typed
//! columns. Array-valued fields (other than strings) and complex types
//! are admitted as unsupported columns.

use crate::error::{Error, Result};
use crate::table::columns::{Column, ColumnType};

const CARD_SIZE: usize = 80;
const BLOCK_SIZE: usize = 2880;

struct Header {
    cards: Vec<(String, String)>,
}

impl Header {
    fn get(&self, keyword: &str) -> Option<&str> {
        self.cards
            .iter()
            .find(|(key, _)| key == keyword)
            .map(|(_, value)| value.as_str())
    }

    fn get_usize(&self, keyword: &str) -> Option<usize> {
        self.get(keyword).and_then(|v| v.parse().ok())
    }
}

/// Extracts the value field of a card, stripping quotes and comments
fn card_value(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix('\'') {
        if let Some(end) = rest.find('\'') {
            return rest[..end].trim_end().to_string();
        }
    }
    trimmed.split('/').next().unwrap_or("").trim().to_string()
}

fn parse_header(data: &[u8], offset: &mut usize) -> Result<Header> {
    let mut cards = Vec::new();

    loop {
        if *offset + BLOCK_SIZE > data.len() {
            return Err(Error::InvalidFormat(
                "FITS: truncated header block".to_string(),
            ));
        }
        let block = &data[*offset..*offset + BLOCK_SIZE];
        *offset += BLOCK_SIZE;

        for card in block.chunks(CARD_SIZE) {
            let text = String::from_utf8_lossy(card);
            let keyword = text[..8].trim_end().to_string();
            if keyword == "END" {
                return Ok(Header { cards });
            }
            if text.len() >= 10 && &text[8..10] == "= " {
                cards.push((keyword, card_value(&text[10..])));
            }
        }
    }
}

/// Byte size of the data unit following a header
fn data_size(header: &Header) -> usize {
    let bitpix = header
        .get("BITPIX")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(8)
        .unsigned_abs() as usize
        / 8;
    let naxis = header.get_usize("NAXIS").unwrap_or(0);
    if naxis == 0 {
        return 0;
    }
    let mut product = 1;
    for i in 1..=naxis {
        product *= header.get_usize(&format!("NAXIS{}", i)).unwrap_or(0);
    }
    let pcount = header.get_usize("PCOUNT").unwrap_or(0);
    let gcount = header.get_usize("GCOUNT").unwrap_or(1);
    bitpix * gcount * (product + pcount)
}

fn padded(size: usize) -> usize {
    size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// Splits a TFORM value into its repeat count and format code
fn parse_tform(tform: &str) -> Result<(usize, char)> {
    let trimmed = tform.trim();
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    let code = trimmed
        .chars()
        .find(|c| c.is_ascii_alphabetic())
        .ok_or_else(|| Error::InvalidFormat(format!("FITS: bad TFORM \"{}\"", tform)))?;
    let repeat = if digits.is_empty() {
        1
    } else {
        digits
            .parse()
            .map_err(|_| Error::InvalidFormat(format!("FITS: bad TFORM \"{}\"", tform)))?
    };
    Ok((repeat, code))
}

fn code_width(code: char) -> Result<usize> {
    match code {
        'L' | 'B' | 'S' | 'A' | 'X' => Ok(1),
        'I' => Ok(2),
        'J' | 'E' => Ok(4),
        'K' | 'D' | 'C' | 'P' => Ok(8),
        'M' | 'Q' => Ok(16),
        _ => Err(Error::InvalidFormat(format!(
            "FITS: unknown TFORM code '{}'",
            code
        ))),
    }
}

/// Builds a column for one field and returns it with its row-buffer width
fn column_from_tform(name: &str, repeat: usize, code: char) -> Result<(Column, usize)> {
    if code == 'A' {
        // A string field is a single column of `repeat` characters
        let mut column = Column::new(name, ColumnType::String);
        column.data_type_size = repeat;
        return Ok((column, repeat));
    }
    if code == 'X' {
        // Bit arrays are stored packed
        let width = repeat.div_ceil(8);
        let mut column = Column::new(name, ColumnType::Unsupported);
        column.data_type_size = width;
        return Ok((column, width));
    }

    let element = code_width(code)?;
    let width = repeat * element;

    // Can't support array-based or complex column types
    let data_type = if repeat != 1 {
        ColumnType::Unsupported
    } else {
        match code {
            'L' => ColumnType::Bool,
            'B' => ColumnType::Uint8,
            'S' => ColumnType::Int8,
            'I' => ColumnType::Int16,
            'J' => ColumnType::Int32,
            'K' => ColumnType::Int64,
            'E' => ColumnType::Float,
            'D' => ColumnType::Double,
            _ => ColumnType::Unsupported,
        }
    };

    let mut column = Column::new(name, data_type);
    column.data_type_size = if data_type == ColumnType::Unsupported {
        width
    } else {
        element
    };
    Ok((column, width))
}

/// Parses the first BINTABLE extension of a FITS file into columns, a
/// row count, and a description taken from EXTNAME
pub fn parse_binary_table(data: &[u8]) -> Result<(Vec<Column>, usize, String)> {
    let mut offset = 0;
    let primary = parse_header(data, &mut offset)?;
    if primary.get("SIMPLE").is_none() {
        return Err(Error::InvalidFormat(
            "FITS: missing SIMPLE keyword".to_string(),
        ));
    }
    offset += padded(data_size(&primary));

    loop {
        if offset >= data.len() {
            return Err(Error::InvalidFormat(
                "FITS: no binary table extension found".to_string(),
            ));
        }
        let header = parse_header(data, &mut offset)?;
        if header.get("XTENSION") != Some("BINTABLE") {
            offset += padded(data_size(&header));
            continue;
        }

        let row_bytes = header
            .get_usize("NAXIS1")
            .ok_or_else(|| Error::InvalidFormat("FITS: missing NAXIS1".to_string()))?;
        let num_rows = header
            .get_usize("NAXIS2")
            .ok_or_else(|| Error::InvalidFormat("FITS: missing NAXIS2".to_string()))?;
        let num_fields = header
            .get_usize("TFIELDS")
            .ok_or_else(|| Error::InvalidFormat("FITS: missing TFIELDS".to_string()))?;

        let mut columns = Vec::with_capacity(num_fields);
        let mut data_offset = 0;
        for i in 1..=num_fields {
            let name = header
                .get(&format!("TTYPE{}", i))
                .unwrap_or("")
                .to_string();
            let tform = header
                .get(&format!("TFORM{}", i))
                .ok_or_else(|| Error::InvalidFormat(format!("FITS: missing TFORM{}", i)))?;

            let (repeat, code) = parse_tform(tform)?;
            let (mut column, width) = column_from_tform(&name, repeat, code)?;
            column.data_offset = data_offset;
            if let Some(unit) = header.get(&format!("TUNIT{}", i)) {
                column.unit = unit.to_string();
            }
            if let Some(description) = header.get(&format!("TCOMM{}", i)) {
                column.description = description.to_string();
            }
            if let Some(ucd) = header.get(&format!("TUCD{}", i)) {
                column.ucd = ucd.to_string();
            }

            data_offset += width;
            columns.push(column);
        }

        if data_offset > row_bytes {
            return Err(Error::InvalidFormat(format!(
                "FITS: fields span {} bytes but rows are {} bytes",
                data_offset, row_bytes
            )));
        }

        let table_bytes = row_bytes * num_rows;
        if offset + table_bytes > data.len() {
            return Err(Error::InvalidFormat(
                "FITS: truncated table data".to_string(),
            ));
        }
        let buffer = &data[offset..offset + table_bytes];

        for column in &mut columns {
            if column.data_type() != ColumnType::Unsupported {
                column.resize(num_rows);
                column.fill_from_buffer(buffer, num_rows, row_bytes);
            }
        }

        let description = header.get("EXTNAME").unwrap_or("").to_string();
        return Ok((columns, num_rows, description));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::columns::Entries;

    fn card(line: &str) -> Vec<u8> {
        let mut bytes = line.as_bytes().to_vec();
        bytes.resize(CARD_SIZE, b' ');
        bytes
    }

    fn header_block(lines: &[&str]) -> Vec<u8> {
        let mut block = Vec::new();
        for line in lines {
            block.extend(card(line));
        }
        block.extend(card("END"));
        block.resize(block.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE, b' ');
        block
    }

    fn sample_fits() -> Vec<u8> {
        let mut data = header_block(&[
            "SIMPLE  =                    T",
            "BITPIX  =                    8",
            "NAXIS   =                    0",
        ]);
        data.extend(header_block(&[
            "XTENSION= 'BINTABLE'",
            "BITPIX  =                    8",
            "NAXIS   =                    2",
            "NAXIS1  =                    9",
            "NAXIS2  =                    2",
            "PCOUNT  =                    0",
            "GCOUNT  =                    1",
            "TFIELDS =                    3",
            "TTYPE1  = 'NAME'",
            "TFORM1  = '4A'",
            "TTYPE2  = 'FLUX'",
            "TFORM2  = '1E'",
            "TUNIT2  = 'Jy'",
            "TUCD2   = 'phot.flux'",
            "TTYPE3  = 'OK'",
            "TFORM3  = '1L'",
            "EXTNAME = 'SOURCES'",
        ]));

        let mut rows = Vec::new();
        rows.extend(b"M31 ");
        rows.extend(1.5f32.to_be_bytes());
        rows.push(b'T');
        rows.extend(b"M33 ");
        rows.extend(2.5f32.to_be_bytes());
        rows.push(b'F');
        rows.resize(rows.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE, 0);
        data.extend(rows);
        data
    }

    #[test]
    fn test_parse_binary_table() {
        let (columns, num_rows, description) = parse_binary_table(&sample_fits()).unwrap();
        assert_eq!(num_rows, 2);
        assert_eq!(description, "SOURCES");
        assert_eq!(columns.len(), 3);

        assert_eq!(columns[0].data_type(), ColumnType::String);
        assert!(matches!(&columns[0].entries, Entries::String(v)
            if v == &vec!["M31".to_string(), "M33".to_string()]));

        assert_eq!(columns[1].data_type(), ColumnType::Float);
        assert_eq!(columns[1].unit, "Jy");
        assert_eq!(columns[1].ucd, "phot.flux");
        assert!(matches!(&columns[1].entries, Entries::Float(v) if v == &vec![1.5, 2.5]));

        assert_eq!(columns[2].data_type(), ColumnType::Bool);
        assert!(matches!(&columns[2].entries, Entries::Bool(v) if v == &vec![true, false]));
    }

    #[test]
    fn test_array_field_unsupported() {
        let (column, width) = column_from_tform("SHAPE", 3, 'E').unwrap();
        assert_eq!(column.data_type(), ColumnType::Unsupported);
        assert_eq!(width, 12);
    }

    #[test]
    fn test_tform_parsing() {
        assert_eq!(parse_tform("12A").unwrap(), (12, 'A'));
        assert_eq!(parse_tform("J").unwrap(), (1, 'J'));
        assert_eq!(parse_tform("1D").unwrap(), (1, 'D'));
        assert!(parse_tform("123").is_err());
    }

    #[test]
    fn test_bad_tform_code_rejected() {
        assert!(column_from_tform("W", 1, 'Z').is_err());
    }

    #[test]
    fn test_missing_bintable_rejected() {
        let data = header_block(&[
            "SIMPLE  =                    T",
            "BITPIX  =                    8",
            "NAXIS   =                    0",
        ]);
        assert!(parse_binary_table(&data).is_err());
    }

    #[test]
    fn test_truncated_data_rejected() {
        let mut data = sample_fits();
        data.truncate(data.len() - BLOCK_SIZE);
        assert!(parse_binary_table(&data).is_err());
    }

    #[test]
    fn test_card_value_forms() {
        assert_eq!(card_value("'BINTABLE'           / extension"), "BINTABLE");
        assert_eq!(card_value("                   42 / answer"), "42");
        assert_eq!(card_value("'padded  '"), "padded");
    }
}
