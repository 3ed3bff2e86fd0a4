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

//! End-to-end tests for the file-based conversion entry point.

use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use csv_kml_convert::{convert_file, Error, InvalidRows};
use tempfile::TempDir;

const CSV: &str = "\
Date,Hour (h),Minute (min),Second (s),Timestamp (ms),\
GPS Latitude (°),GPS Longitude (°),GPS Altitude (m),GPS Speed (km/h)
240115,13,5,9,42,37.5,-122.3,10.0,4.2
240115,13,5,10,43,37.6,-122.4,11.0,4.3
";

fn run_time(value: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").unwrap()
}

fn write_input(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let input = dir.path().join("track.csv");
    fs::write(&input, content).unwrap();
    input
}

/// The placemark section of a written document, with the envelope stripped.
fn placemarks(path: &Path) -> String {
    let kml = fs::read_to_string(path).unwrap();
    let start = kml.find("<Placemark").unwrap();
    let end = kml.rfind("</Placemark>").unwrap();
    kml[start..end].to_string()
}

#[test]
fn writes_file_with_run_timestamp_in_name() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, CSV);

    let written = convert_file(
        &input,
        &dir.path().join("track.kml"),
        InvalidRows::Fail,
        &run_time("2024-01-15 13:05:09"),
    )
    .unwrap();

    assert_eq!(
        written,
        dir.path().join("track_20240115_130509.kml")
    );
    let kml = fs::read_to_string(&written).unwrap();
    assert!(kml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
    assert_eq!(kml.matches("<Placemark").count(), 2);
    assert!(kml.contains("-122.3,37.5,10.0"));
    assert!(kml.contains("<when>2024-01-15T13:05:09.042000Z</when>"));
}

#[test]
fn repeated_runs_keep_earlier_results() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, CSV);
    let output = dir.path().join("track.kml");

    let first = convert_file(
        &input,
        &output,
        InvalidRows::Fail,
        &run_time("2024-01-15 13:05:09"),
    )
    .unwrap();
    let second = convert_file(
        &input,
        &output,
        InvalidRows::Fail,
        &run_time("2024-01-15 14:00:00"),
    )
    .unwrap();

    assert_ne!(first, second);
    assert!(first.exists());
    assert!(second.exists());
    assert_eq!(placemarks(&first), placemarks(&second));
}

#[test]
fn missing_input_fails_without_output() {
    let dir = TempDir::new().unwrap();

    let err = convert_file(
        &dir.path().join("absent.csv"),
        &dir.path().join("track.kml"),
        InvalidRows::Fail,
        &run_time("2024-01-15 13:05:09"),
    )
    .unwrap_err();

    assert!(matches!(err, Error::ReadFile { .. }));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn missing_column_leaves_no_output_file() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, &CSV.replace(",GPS Speed (km/h)", "").replace(",4.2", "").replace(",4.3", ""));

    let err = convert_file(
        &input,
        &dir.path().join("track.kml"),
        InvalidRows::Fail,
        &run_time("2024-01-15 13:05:09"),
    )
    .unwrap_err();

    assert!(matches!(err, Error::MissingColumn("GPS Speed (km/h)")));
    // Only the input file remains.
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn malformed_row_leaves_no_output_file() {
    let dir = TempDir::new().unwrap();
    let input = write_input(
        &dir,
        &CSV.replace("240115,13,5,10", "240115,13,5,61"),
    );

    let err = convert_file(
        &input,
        &dir.path().join("track.kml"),
        InvalidRows::Fail,
        &run_time("2024-01-15 13:05:09"),
    )
    .unwrap_err();

    match err {
        Error::Timestamp { composite } => assert_eq!(composite, "2024-01-15 13:05:61.043"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn lenient_mode_skips_malformed_rows() {
    let dir = TempDir::new().unwrap();
    let input = write_input(
        &dir,
        &CSV.replace("240115,13,5,10", "240115,13,5,61"),
    );

    let written = convert_file(
        &input,
        &dir.path().join("track.kml"),
        InvalidRows::Skip,
        &run_time("2024-01-15 13:05:09"),
    )
    .unwrap();

    let kml = fs::read_to_string(&written).unwrap();
    assert_eq!(kml.matches("<Placemark").count(), 1);
    assert!(kml.contains("-122.3,37.5,10.0"));
}

#[test]
fn unwritable_destination_fails() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, CSV);

    let err = convert_file(
        &input,
        &dir.path().join("no/such/dir/track.kml"),
        InvalidRows::Fail,
        &run_time("2024-01-15 13:05:09"),
    )
    .unwrap_err();

    assert!(matches!(err, Error::WriteFile { .. }));
}
