// Copyright 2024 Viktor Reusch
//
// This file is part of csv_kml_convert.
//
// csv_kml_convert is free software: you can redistribute it and/or modify it
// under the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// csv_kml_convert is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with csv_kml_convert. If not, see <https://www.gnu.org/licenses/>.

//! Library for converting CSV GPS telemetry logs to
//! [KML](https://developers.google.com/kml).
//!
//! It reads time-stamped GPS samples from a CSV table and converts each one
//! to a KML point placemark for visualization.
//!
//! See [`convert`] for information on how to use this library.

use std::fmt::{self, Display};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime, TimeZone, Timelike};
use kml::types::{Element, Placemark};
use kml::{Kml, KmlDocument, KmlVersion, KmlWriter};
use log::warn;
use thiserror::Error;

/// This line needs to be prepended to the KML output.
const XML_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
/// Namespace attributes for the `<kml>` tag.
const NAMESPACES: &[(&str, &str)] = &[("xmlns", "http://www.opengis.net/kml/2.2")];
/// Name of the single KML _Document_.
const DOCUMENT_NAME: &str = "GPS Data";
/// Format of the composite date-time string built from the date and
/// time-of-day fields of one row.
const COMPOSITE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
/// Format of the run timestamp embedded into the output file name.
const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Required CSV header labels, in the order the fields are consumed.
const REQUIRED_COLUMNS: [&str; 9] = [
    "Date",
    "Hour (h)",
    "Minute (min)",
    "Second (s)",
    "Timestamp (ms)",
    "GPS Latitude (°)",
    "GPS Longitude (°)",
    "GPS Altitude (m)",
    "GPS Speed (km/h)",
];

/// Use double precision for coordinate values.
type CoordValue = f64;

/// Error returned from the [`convert`] and [`convert_file`] functions.
#[derive(Error, Debug)]
pub enum Error {
    /// Reading the CSV table failed.
    #[error("reading CSV failed: {0}")]
    Csv(#[from] csv::Error),
    /// A required column is absent from the CSV header.
    #[error("missing required column: {0}")]
    MissingColumn(&'static str),
    /// A field value could not be coerced to its target type.
    #[error("row {row}: cannot parse {column} value {value:?}")]
    Coerce {
        /// 1-based data row number (the header does not count).
        row: usize,
        /// Header label of the offending column.
        column: &'static str,
        /// Verbatim field value.
        value: String,
    },
    /// A composed date-time string failed to parse.
    #[error("failed to parse date string: {composite}")]
    Timestamp {
        /// The composite date-time string built from the row.
        composite: String,
    },
    /// KML writing failed.
    #[error("writing KML failed: {0}")]
    Kml(#[from] kml::Error),
    /// Writing to the KML sink failed.
    #[error("writing KML failed: {0}")]
    Io(#[from] io::Error),
    /// Reading the input file failed.
    #[error("cannot read {path}: {source}")]
    ReadFile {
        /// Path of the input file.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// Writing the output file failed.
    #[error("cannot write {path}: {source}")]
    WriteFile {
        /// Path of the output file.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// How to treat a row whose values are present but cannot be converted to a
/// placemark (unparseable field or invalid date-time).
///
/// Rows with an empty required field are dropped silently under both
/// policies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InvalidRows {
    /// Abort the whole conversion on the first invalid row.
    #[default]
    Fail,
    /// Skip invalid rows with a warning and convert the rest.
    Skip,
}

/// One GPS sample with all required fields present and coerced.
#[derive(Debug)]
struct GpsRow {
    /// Sample date as a `YYMMDD` string.
    date: String,
    hour: i64,
    minute: i64,
    second: i64,
    /// Sub-second fraction of the sample timestamp.
    fraction: i64,
    latitude: f64,
    longitude: f64,
    altitude: f64,
    speed: f64,
}

/// Read a CSV file of GPS samples and write a KML file.
///
/// A complete CSV table with a header row is read from `source`. Each row
/// with all required fields present is converted to one time-stamped KML
/// _Placemark_, in input order, and the resulting document is written as a
/// complete KML file to `sink`. `invalid_rows` selects whether a row which
/// cannot be converted aborts the conversion or is skipped.
///
/// If an error occurs, the function returns immediately. The `source` and
/// `sink` might have been modified in this case.
///
/// # Example
/// ```
/// # use csv_kml_convert::{convert, InvalidRows};
/// #
/// let source = "\
/// Date,Hour (h),Minute (min),Second (s),Timestamp (ms),GPS Latitude (°),GPS Longitude (°),GPS Altitude (m),GPS Speed (km/h)
/// 240115,13,5,9,42,48.858222,2.2945,103.0,4.2
/// ";
/// let mut sink = vec![];
///
/// convert(source.as_bytes(), &mut sink, InvalidRows::Fail).expect("conversion failed");
///
/// let kml = String::from_utf8(sink).expect("KML data is not valid UTF-8");
/// assert!(kml.contains("<kml"));
/// assert!(kml.contains("2.2945,48.858222,103.0"));
/// assert!(kml.contains("2024-01-15T13:05:09.042000Z"));
/// ```
pub fn convert(
    source: impl Read,
    mut sink: impl Write,
    invalid_rows: InvalidRows,
) -> Result<(), Error> {
    let mut reader = csv::Reader::from_reader(source);
    let columns = find_columns(reader.headers()?)?;

    let mut elements = vec![simple_kelem("name", DOCUMENT_NAME)];
    for (index, record) in reader.records().enumerate() {
        let row = index + 1;
        match convert_record(&record?, &columns, row) {
            Ok(Some(placemark)) => elements.push(placemark),
            Ok(None) => {}
            Err(err) if invalid_rows == InvalidRows::Skip => {
                warn!("skipping row {row}: {err}");
            }
            Err(err) => return Err(err),
        }
    }

    let document = Kml::Document {
        elements,
        attrs: Default::default(),
    };
    let namespaces = NAMESPACES
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let kml = Kml::<CoordValue>::KmlDocument(KmlDocument {
        version: KmlVersion::V22,
        attrs: namespaces,
        elements: vec![document],
    });

    writeln!(&mut sink, "{XML_HEAD}")?;
    let mut writer = KmlWriter::from_writer(&mut sink);
    writer.write(&kml)?;
    writeln!(&mut sink)?;

    Ok(())
}

/// Convert the CSV file at `input` and write the KML document derived from
/// `output`.
///
/// The document is assembled fully in memory and written with a single write,
/// so a failing conversion leaves no partial file behind. `run_time` is
/// embedded into the name of the written file (see [`output_path`]), which
/// deliberately differs from `output`.
///
/// Returns the path of the written file.
pub fn convert_file(
    input: &Path,
    output: &Path,
    invalid_rows: InvalidRows,
    run_time: &NaiveDateTime,
) -> Result<PathBuf, Error> {
    let source = File::open(input).map_err(|source| Error::ReadFile {
        path: input.to_path_buf(),
        source,
    })?;

    let mut sink = vec![];
    convert(source, &mut sink, invalid_rows)?;

    let path = output_path(output, run_time);
    fs::write(&path, sink).map_err(|source| Error::WriteFile {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Compute the actual output path by embedding `run_time` into `path`.
///
/// The first occurrence of `.kml` in `path` is replaced with
/// `_{run timestamp}.kml`. A path without `.kml` gets `_{run timestamp}.kml`
/// appended.
pub fn output_path(path: &Path, run_time: &NaiveDateTime) -> PathBuf {
    let timestamp = run_time.format(RUN_TIMESTAMP_FORMAT);
    let path = path.to_string_lossy();
    match path.find(".kml") {
        Some(at) => {
            let rest = &path[at + ".kml".len()..];
            PathBuf::from(format!("{}_{timestamp}.kml{rest}", &path[..at]))
        }
        None => PathBuf::from(format!("{path}_{timestamp}.kml")),
    }
}

/// Resolve the indices of all [`REQUIRED_COLUMNS`] in `headers`.
///
/// Labels are matched by exact string, including their unit annotations.
fn find_columns(headers: &csv::StringRecord) -> Result<[usize; 9], Error> {
    let mut columns = [0; 9];
    for (slot, &column) in columns.iter_mut().zip(&REQUIRED_COLUMNS) {
        *slot = headers
            .iter()
            .position(|header| header == column)
            .ok_or(Error::MissingColumn(column))?;
    }
    Ok(columns)
}

/// Convert one CSV `record` to a KML _Placemark_.
///
/// Returns `Ok(None)` for a record with an empty required field, which is
/// dropped without an error.
fn convert_record(
    record: &csv::StringRecord,
    columns: &[usize; 9],
    row: usize,
) -> Result<Option<Kml<CoordValue>>, Error> {
    let Some(gps_row) = validate_record(record, columns, row)? else {
        return Ok(None);
    };

    let timestamp = compose_timestamp(&gps_row)?;
    let children = vec![
        Element {
            name: "TimeStamp".to_string(),
            children: vec![simple_element("when", timestamp.iso)],
            ..Default::default()
        },
        Element {
            name: "Point".to_string(),
            children: vec![simple_element(
                "coordinates",
                format!(
                    "{},{},{}",
                    Number(gps_row.longitude),
                    Number(gps_row.latitude),
                    Number(gps_row.altitude)
                ),
            )],
            ..Default::default()
        },
    ];

    Ok(Some(Kml::Placemark(Placemark {
        name: Some(format!("Timestamp: {} ms", timestamp.epoch_ms)),
        description: Some(format!(
            "Speed: {} km/h<br>Altitude: {} m",
            Number(gps_row.speed),
            Number(gps_row.altitude)
        )),
        children,
        ..Default::default()
    })))
}

/// Project `record` through the required `columns` and coerce the fields.
///
/// Returns `Ok(None)` if any required field is empty.
fn validate_record(
    record: &csv::StringRecord,
    columns: &[usize; 9],
    row: usize,
) -> Result<Option<GpsRow>, Error> {
    let mut fields = [""; 9];
    for (field, &column) in fields.iter_mut().zip(columns) {
        let value = record.get(column).unwrap_or_default().trim();
        if value.is_empty() {
            return Ok(None);
        }
        *field = value;
    }
    let [date, hour, minute, second, fraction, latitude, longitude, altitude, speed] = fields;

    Ok(Some(GpsRow {
        date: date.to_string(),
        hour: parse_int(hour, REQUIRED_COLUMNS[1], row)?,
        minute: parse_int(minute, REQUIRED_COLUMNS[2], row)?,
        second: parse_int(second, REQUIRED_COLUMNS[3], row)?,
        fraction: parse_int(fraction, REQUIRED_COLUMNS[4], row)?,
        latitude: parse_float(latitude, REQUIRED_COLUMNS[5], row)?,
        longitude: parse_float(longitude, REQUIRED_COLUMNS[6], row)?,
        altitude: parse_float(altitude, REQUIRED_COLUMNS[7], row)?,
        speed: parse_float(speed, REQUIRED_COLUMNS[8], row)?,
    }))
}

/// Coerce an integer field.
///
/// Loggers may render integer fields as floats (`"13.0"`), so parse as float
/// and truncate toward zero.
fn parse_int(value: &str, column: &'static str, row: usize) -> Result<i64, Error> {
    parse_float(value, column, row).map(|float| float as i64)
}

/// Coerce a float field.
fn parse_float(value: &str, column: &'static str, row: usize) -> Result<f64, Error> {
    value.parse().map_err(|_| Error::Coerce {
        row,
        column,
        value: value.to_string(),
    })
}

/// Timestamp data derived from one GPS sample.
struct Timestamp {
    /// Milliseconds since the Unix epoch, interpreting the sample clock in
    /// the process-local timezone.
    epoch_ms: i64,
    /// ISO-8601 rendering of the sample date-time with a `Z` suffix.
    iso: String,
}

/// Build the [`Timestamp`] of `row` from its date and time-of-day fields.
///
/// The `YYMMDD` date is expanded with a `20` century prefix, so only the
/// years 2000 through 2099 are representable. The timestamp fraction is
/// left-padded to at least 3 digits, truncated to at most 6, and used
/// verbatim as the sub-second decimal digits.
fn compose_timestamp(row: &GpsRow) -> Result<Timestamp, Error> {
    let mut fraction = format!("{:03}", row.fraction);
    fraction.truncate(6);

    let composite = format!(
        "20{}-{}-{} {:02}:{:02}:{:02}.{fraction}",
        row.date.get(0..2).unwrap_or_default(),
        row.date.get(2..4).unwrap_or_default(),
        row.date.get(4..6).unwrap_or_default(),
        row.hour,
        row.minute,
        row.second,
    );
    let Ok(datetime) = NaiveDateTime::parse_from_str(&composite, COMPOSITE_FORMAT) else {
        return Err(Error::Timestamp { composite });
    };
    // Ambiguous local times (daylight saving transitions) resolve to the
    // earlier instant; a nonexistent local time is treated like an
    // unparseable one.
    let Some(local) = Local.from_local_datetime(&datetime).earliest() else {
        return Err(Error::Timestamp { composite });
    };

    Ok(Timestamp {
        epoch_ms: local.timestamp_millis(),
        iso: iso_utc_label(&datetime),
    })
}

/// ISO-8601 rendering of the naive `datetime` with a literal `Z` appended.
///
/// This labels the sample clock as UTC without converting it. The logs carry
/// no timezone information, so the label is only correct for loggers running
/// on UTC; a future timezone-aware mode only needs to replace this function.
fn iso_utc_label(datetime: &NaiveDateTime) -> String {
    let format = if datetime.nanosecond() == 0 {
        "%Y-%m-%dT%H:%M:%S"
    } else {
        "%Y-%m-%dT%H:%M:%S%.6f"
    };
    format!("{}Z", datetime.format(format))
}

/// Renders a float with a trailing `.0` on whole numbers.
///
/// `Display` for `f64` drops the `.0`, which would turn an altitude of
/// `10.0` into `10` in descriptions and coordinate strings; `Debug` keeps it.
struct Number(f64);

impl Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Create a simple KML element with `name` and `content`.
fn simple_kelem(name: impl Into<String>, content: impl Into<String>) -> Kml<CoordValue> {
    Kml::Element(simple_element(name, content))
}

/// Create a simple KML element with `name` and `content`.
fn simple_element(name: impl Into<String>, content: impl Into<String>) -> Element {
    Element {
        name: name.into(),
        content: Some(content.into()),
        ..Default::default()
    }
}
