use crate::error::ConfigError;
use crate::geo_query::Coordinate;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use tracing::warn;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ColumnNames {
    pub latitude: String,
    pub longitude: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            latitude: "EA_GPS_LA".to_string(),
            longitude: "EA_GPS_LO".to_string(),
        }
    }
}

/// A row that could not be turned into a coordinate. Skipped, never fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedRow {
    pub line: u64,
    pub fields: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct CoordinateSheet {
    pub coordinates: Vec<Coordinate>,
    pub malformed: Vec<MalformedRow>,
}

pub fn read_coordinates<P: AsRef<Path>>(
    path: P,
    columns: &ColumnNames,
) -> Result<CoordinateSheet, ConfigError> {
    let path = path.as_ref();
    let reader = csv_builder()
        .from_path(path)
        .map_err(|source| ConfigError::CoordinateFile {
            path: path.to_path_buf(),
            source,
        })?;
    parse_records(reader, columns, path)
}

pub fn parse_coordinates<R: Read>(
    input: R,
    columns: &ColumnNames,
) -> Result<CoordinateSheet, ConfigError> {
    parse_records(csv_builder().from_reader(input), columns, Path::new("<input>"))
}

fn csv_builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.trim(csv::Trim::All).flexible(true);
    builder
}

fn parse_records<R: Read>(
    mut reader: csv::Reader<R>,
    columns: &ColumnNames,
    path: &Path,
) -> Result<CoordinateSheet, ConfigError> {
    let headers = reader
        .headers()
        .map_err(|source| ConfigError::CoordinateFile {
            path: path.to_path_buf(),
            source,
        })?
        .clone();
    let column_index = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| ConfigError::MissingColumn {
                path: path.to_path_buf(),
                column: name.to_string(),
            })
    };
    let lat_idx = column_index(&columns.latitude)?;
    let lon_idx = column_index(&columns.longitude)?;

    let mut sheet = CoordinateSheet::default();
    for (row, record) in reader.records().enumerate() {
        // Header is line 1
        let fallback_line = row as u64 + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                let line = e
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(fallback_line);
                skip(&mut sheet, line, vec![], e.to_string());
                continue;
            }
        };
        let line = record
            .position()
            .map(|p| p.line())
            .unwrap_or(fallback_line);

        match parse_pair(record.get(lat_idx), record.get(lon_idx)) {
            Ok(coordinate) => sheet.coordinates.push(coordinate),
            Err(reason) => skip(
                &mut sheet,
                line,
                record.iter().map(str::to_string).collect(),
                reason,
            ),
        }
    }
    Ok(sheet)
}

fn parse_pair(lat: Option<&str>, lon: Option<&str>) -> Result<Coordinate, String> {
    let latitude = parse_field("latitude", lat)?;
    let longitude = parse_field("longitude", lon)?;
    Ok(Coordinate::new(latitude, longitude))
}

fn parse_field(name: &str, value: Option<&str>) -> Result<f64, String> {
    let value = value.ok_or_else(|| format!("missing {name}"))?;
    let parsed: f64 = value
        .parse()
        .map_err(|_| format!("{name} '{value}' is not a number"))?;
    if !parsed.is_finite() {
        return Err(format!("{name} '{value}' is not finite"));
    }
    Ok(parsed)
}

fn skip(sheet: &mut CoordinateSheet, line: u64, fields: Vec<String>, reason: String) {
    warn!(line, ?fields, %reason, "Skipping row with invalid data");
    sheet.malformed.push(MalformedRow {
        line,
        fields,
        reason,
    });
}
