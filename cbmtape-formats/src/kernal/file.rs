/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
use core::fmt;
use core::mem;

use arrayvec::ArrayVec;
#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

#[cfg(feature = "report")]
use serde::{Serialize, Deserialize};

use cbmtape_core::audio::Polarity;
use cbmtape_core::clock::ClassifiedPulse;

use super::basic::{list_basic, BasicListing};
use super::pulse::DecodeExt;
use super::{petscii_to_ascii, Block, BlockKind, BlockReader, CopyMerger, FileType, Header};
use super::consts::*;

/// A file recovered from the recording.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
pub struct RecoveredFile {
    /// The filename as found in the header, without padding.
    pub filename: ArrayVec<u8, FILENAME_SIZE>,
    pub file_type: FileType,
    pub load_address: u16,
    pub end_address: u16,
    #[cfg_attr(feature = "report", serde(skip))]
    pub content: Vec<u8>,
    /// `true` if every block of this file was complete, with a matching checksum and no check bit errors.
    pub checksum_valid: bool,
    /// `true` if there is less content than the header announced.
    pub truncated: bool,
    /// The index of the audio channel the file was recovered from.
    pub channel: usize,
    pub polarity: Polarity,
    /// The sample offset of the first block of this file.
    pub start: u64,
    /// The sample offset at which the last block of this file ended.
    pub end: u64,
}

/// The outcome of [FileAssembler::finish].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Recovery {
    pub files: Vec<RecoveredFile>,
    /// The number of headers not followed by any data.
    pub orphan_headers: usize,
    /// The number of blocks processed.
    pub blocks: usize,
    /// The number of payload bytes in all processed blocks.
    pub decoded_bytes: usize,
}

#[derive(Clone, Debug)]
enum Pending {
    Nothing,
    Program {
        header: Header,
        valid: bool,
        start: u64,
    },
    Sequential {
        file: RecoveredFile,
        /// The length of content before the last appended block.
        last_block: usize,
    },
}

/// Pairs headers with the data blocks following them.
///
/// Blocks should be pushed in the order of recording, with both copies already merged.
#[derive(Clone, Debug)]
pub struct FileAssembler {
    channel: usize,
    polarity: Polarity,
    keep_headerless: bool,
    pending: Pending,
    recovery: Recovery,
}

impl RecoveredFile {
    /// Returns the filename converted to printable ASCII. Non printable characters are replaced with `?`.
    pub fn filename_lossy(&self) -> String {
        self.filename.iter().map(|&b| petscii_to_ascii(b).unwrap_or('?')).collect()
    }
    /// Returns `true` if the file was recovered without any errors.
    pub fn is_valid(&self) -> bool {
        self.checksum_valid && !self.truncated
    }
    /// Returns the length of the recovered content.
    pub fn len(&self) -> usize {
        self.content.len()
    }
    /// Returns `true` if nothing was recovered.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
    /// Returns the listing of a BASIC program, `None` for other file types.
    pub fn basic_listing(&self) -> Option<BasicListing> {
        match self.file_type {
            FileType::BasicProgram => Some(list_basic(self.load_address, &self.content)),
            _ => None
        }
    }

    fn from_header(header: &Header, start: u64) -> Self {
        RecoveredFile {
            filename: header.name.clone(),
            file_type: header.file_type,
            load_address: header.load_address,
            end_address: header.end_address,
            content: Vec::new(),
            checksum_valid: true,
            truncated: false,
            channel: 0,
            polarity: Polarity::Normal,
            start,
            end: start
        }
    }
}

impl fmt::Display for RecoveredFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: \"{}\" ${:04X}-${:04X}, {} bytes",
            self.file_type, self.filename_lossy(), self.load_address, self.end_address, self.content.len())?;
        if self.truncated {
            f.write_str(", truncated")?;
        }
        if !self.checksum_valid {
            f.write_str(", checksum error")?;
        }
        Ok(())
    }
}

impl Default for FileAssembler {
    fn default() -> Self {
        FileAssembler::new()
    }
}

impl FileAssembler {
    /// Creates an assembler keeping data blocks without headers.
    pub fn new() -> Self {
        FileAssembler {
            channel: 0,
            polarity: Polarity::Normal,
            keep_headerless: true,
            pending: Pending::Nothing,
            recovery: Recovery::default()
        }
    }
    /// Sets the origin recorded in each produced file.
    pub fn with_channel(mut self, channel: usize, polarity: Polarity) -> Self {
        self.channel = channel;
        self.polarity = polarity;
        self
    }
    /// Determines whether data blocks without headers are emitted as [FileType::Headerless] files.
    pub fn with_headerless(mut self, keep_headerless: bool) -> Self {
        self.keep_headerless = keep_headerless;
        self
    }
    /// Returns the files assembled so far.
    pub fn files(&self) -> &[RecoveredFile] {
        &self.recovery.files
    }
    /// Processes the next block of the recording.
    pub fn push(&mut self, block: Block) {
        debug!("{}", block);
        self.recovery.blocks += 1;
        self.recovery.decoded_bytes += block.payload.len();
        let kind = match &self.pending {
            Pending::Program { header, .. } if header.data_length() == HEADER_SIZE
                                            && block.payload.len() == HEADER_SIZE => BlockKind::Data,
            _ => block.kind()
        };
        match kind {
            BlockKind::Header => self.push_header(block),
            BlockKind::SeqData => self.push_seq_data(block),
            BlockKind::Data => self.push_data(block)
        }
    }
    /// Flushes the pending file and returns everything recovered.
    pub fn finish(mut self) -> Recovery {
        self.flush();
        self.recovery
    }

    fn push_header(&mut self, block: Block) {
        self.flush();
        let header = match block.header() {
            Some(header) => header,
            None => return self.push_data(block)
        };
        if !block.is_valid() {
            warn!("damaged header: {}", header);
        }
        match header.file_type {
            FileType::BasicProgram|FileType::Program => {
                self.pending = Pending::Program { header, valid: block.is_valid(), start: block.start };
            }
            FileType::SeqFile => {
                let mut file = self.new_file(&header, block.start);
                file.checksum_valid = block.is_valid();
                file.end = block.end;
                self.pending = Pending::Sequential { file, last_block: 0 };
            }
            _ => info!("end of tape marker: \"{}\"", header.name_lossy())
        }
    }

    fn push_seq_data(&mut self, block: Block) {
        if let Pending::Sequential { file, last_block } = &mut self.pending {
            *last_block = file.content.len();
            file.content.extend_from_slice(&block.payload[1..]);
            file.checksum_valid &= block.is_valid();
            file.truncated |= !block.is_complete();
            file.end = block.end;
        }
        else {
            self.push_data(block);
        }
    }

    fn push_data(&mut self, block: Block) {
        match mem::replace(&mut self.pending, Pending::Nothing) {
            Pending::Program { header, valid, start } => {
                let mut file = self.new_file(&header, start);
                let expected = header.data_length();
                let complete = block.is_complete();
                file.checksum_valid = valid && block.is_valid();
                file.end = block.end;
                let mut content = block.payload;
                content.truncate(expected);
                file.truncated = content.len() < expected || !complete;
                file.content = content;
                self.emit(file);
            }
            pending => {
                self.pending = pending;
                self.flush();
                if self.keep_headerless {
                    let mut name = ArrayVec::<u8, FILENAME_SIZE>::new();
                    let label = format!("DATA@{}", block.start);
                    let len = label.len().min(FILENAME_SIZE);
                    let _ = name.try_extend_from_slice(&label.as_bytes()[..len]);
                    let file = RecoveredFile {
                        filename: name,
                        file_type: FileType::Headerless,
                        load_address: 0,
                        end_address: block.payload.len() as u16,
                        checksum_valid: block.is_valid(),
                        truncated: !block.is_complete(),
                        channel: self.channel,
                        polarity: self.polarity,
                        start: block.start,
                        end: block.end,
                        content: block.payload,
                    };
                    self.emit(file);
                }
                else {
                    debug!("skipping data without a header");
                }
            }
        }
    }

    fn flush(&mut self) {
        match mem::replace(&mut self.pending, Pending::Nothing) {
            Pending::Nothing => {}
            Pending::Program { header, .. } => {
                warn!("no data for: {}", header);
                self.recovery.orphan_headers += 1;
            }
            Pending::Sequential { mut file, last_block } => {
                let end = file.content[last_block..].iter().rposition(|&b| b != 0)
                                                          .map_or(last_block, |n| last_block + n + 1);
                file.content.truncate(end);
                self.emit(file);
            }
        }
    }

    fn new_file(&self, header: &Header, start: u64) -> RecoveredFile {
        let mut file = RecoveredFile::from_header(header, start);
        file.channel = self.channel;
        file.polarity = self.polarity;
        file
    }

    fn emit(&mut self, file: RecoveredFile) {
        if file.is_valid() {
            info!("recovered {}", file);
        }
        else {
            warn!("recovered {}", file);
        }
        self.recovery.files.push(file);
    }
}

/// Decodes classified pulses of a single channel into files.
///
/// Decodes bytes, gathers them into blocks, merges both copies of each block and assembles files.
pub fn recover_files<I>(pulses: I, mut assembler: FileAssembler) -> Recovery
    where I: Iterator<Item=ClassifiedPulse>
{
    let blocks = BlockReader::new(pulses.decode()).filter_map(Block::from_raw);
    for block in CopyMerger::new(blocks) {
        assembler.push(block);
    }
    assembler.finish()
}
