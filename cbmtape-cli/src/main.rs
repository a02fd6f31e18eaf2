/*
    Copyright (C) 2026  CBMTAPE developers

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU General Public License as published by
    the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU General Public License for more details.

    You should have received a copy of the GNU General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/
use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};

use clap::clap_app;
#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};
use serde_json::json;

use cbmtape::formats::tap::TapeMachine;
use cbmtape::search::{search_recording, PhaseSearch, SearchConfig, TapeSearch};
use cbmtape_utils::export::{export_files, export_name};
use cbmtape_utils::wav::read_wav;

type Result<T> = core::result::Result<T, Box<dyn Error>>;

fn main() -> Result<()> {
    let matches = clap_app!(cbmtape =>
        (version: env!("CARGO_PKG_VERSION"))
        (about: "Recovers files from WAV recordings of Commodore cassette tapes")
        (@arg input: -i --input +takes_value +required "WAV recording of a tape")
        (@arg output: -o --output +takes_value "Saves recovered files in this directory")
        (@arg tap: -t --tap +takes_value "Writes the recording as a TAP image")
        (@arg machine: -m --machine +takes_value
            "TAP image machine: c64-pal (default), c64-ntsc, vic20-pal, vic20-ntsc, c16-pal, c16-ntsc")
        (@arg phase: -p --phase +takes_value "Waveform polarity: normal, inverted or both (default)")
        (@arg report: -r --report +takes_value "Writes a JSON report")
        (@arg list: -l --list "Prints listings of recovered BASIC programs")
        (@arg debug: -d --debug "Enables debug messages")
    ).get_matches();

    let level = if matches.is_present("debug") { log::Level::Debug } else { log::Level::Info };
    simple_logger::init_with_level(level)?;

    let machine = matches.value_of("machine").map(str::parse::<TapeMachine>).transpose()?
                         .unwrap_or_default();
    let phases = matches.value_of("phase").map(str::parse::<PhaseSearch>).transpose()?
                        .unwrap_or_default();
    let config = SearchConfig::default().with_machine(machine).with_phases(phases);

    let input = matches.value_of("input").unwrap_or_default();
    let channels = read_wav(input)?;
    for (n, channel) in channels.iter().enumerate() {
        debug!("channel {}: {} samples, {:.1} s", n, channel.len(), channel.duration_secs());
    }

    let search = search_recording(&channels, &config);
    print_files(&search, matches.is_present("list"));

    if let Some(dir) = matches.value_of("output") {
        let paths = export_files(dir, &search.files)?;
        info!("saved {} file(s) in {}", paths.len(), dir);
    }

    if let Some(path) = matches.value_of("tap") {
        match &search.image {
            Some(image) => {
                image.write_to(BufWriter::new(File::create(path)?))?;
                info!("TAP image: {}, {} bytes", path, image.file_size());
            }
            None => warn!("no pulses for a TAP image")
        }
    }

    if let Some(path) = matches.value_of("report") {
        let files: Vec<_> = search.files.iter().enumerate().map(|(n, file)| json!({
            "name": file.filename_lossy(),
            "export_name": export_name(n, file),
            "length": file.len(),
            "valid": file.is_valid(),
            "listing": file.basic_listing().map(|listing| listing.to_string()),
            "file": file,
        })).collect();
        let report = json!({
            "input": input,
            "selected": search.selected,
            "candidates": search.reports,
            "files": files,
        });
        let mut wr = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut wr, &report)?;
        wr.flush()?;
        info!("report: {}", path);
    }
    Ok(())
}

fn print_files(search: &TapeSearch, list: bool) {
    if let Some(selected) = search.selected {
        println!("Selected {}", selected);
    }
    if search.files.is_empty() {
        println!("No files found.");
    }
    for (n, file) in search.files.iter().enumerate() {
        println!("{:02}: {}", n, file);
        match file.basic_listing() {
            Some(listing) if list => print!("{}", listing),
            _ => {}
        }
    }
}
