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

//! This is a very simple command-line interface for the CSV-to-KML converter.

use std::{path::PathBuf, process::ExitCode};

use chrono::Local;
use clap::Parser;
use csv_kml_convert::{convert_file, InvalidRows};

/// Convert CSV GPS telemetry to a time-stamped KML document.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path of the input CSV file.
    input_csv: PathBuf,
    /// Requested path of the output KML file.
    ///
    /// A run timestamp is embedded into the name of the actually written
    /// file, which is printed on success.
    output_kml: PathBuf,
    /// Skip rows which cannot be converted instead of aborting.
    #[arg(long)]
    lenient: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    let invalid_rows = if args.lenient {
        InvalidRows::Skip
    } else {
        InvalidRows::Fail
    };

    match convert_file(
        &args.input_csv,
        &args.output_kml,
        invalid_rows,
        &Local::now().naive_local(),
    ) {
        Ok(path) => {
            println!("KML file saved as: {}", path.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Conversion failed with: {err}");
            ExitCode::FAILURE
        }
    }
}
