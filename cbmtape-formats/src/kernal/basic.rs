/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
//! Text listings of tokenized Commodore BASIC programs.
//!
//! A program is a chain of lines, each one laid out as:
//!
//! | size | content                                      |
//! |------|----------------------------------------------|
//! | 2    | the address of the next line (little endian) |
//! | 2    | the line number (little endian)              |
//! | *    | tokenized text                               |
//! | 1    | `0` terminator                               |
//!
//! The chain ends with a next line address of `0`.
//!
//! Keywords of BASIC 2.0, 3.5 and 7.0 are expanded outside of quotes. Control characters
//! are rendered as `<name>`, graphics characters with their nearest Unicode symbols.
use core::fmt;
use std::error::Error;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

#[cfg(feature = "report")]
use serde::{Serialize, Deserialize};

/// The first byte value used as a keyword token.
pub const FIRST_TOKEN: u8 = 0x80;

/// Keywords for tokens `$80..=$FD`.
pub const KEYWORDS: [&str; 126] = [
    "END", "FOR", "NEXT", "DATA", "INPUT#", "INPUT", "DIM", "READ",
    "LET", "GOTO", "RUN", "IF", "RESTORE", "GOSUB", "RETURN", "REM",
    "STOP", "ON", "WAIT", "LOAD", "SAVE", "VERIFY", "DEF", "POKE",
    "PRINT#", "PRINT", "CONT", "LIST", "CLR", "CMD", "SYS", "OPEN",
    "CLOSE", "GET", "NEW", "TAB(", "TO", "FN", "SPC(", "THEN",
    "NOT", "STEP", "+", "-", "*", "/", "^", "AND",
    "OR", ">", "=", "<", "SGN", "INT", "ABS", "USR",
    "FRE", "POS", "SQR", "RND", "LOG", "EXP", "COS", "SIN",
    "TAN", "ATN", "PEEK", "LEN", "STR$", "VAL", "ASC", "CHR$",
    "LEFT$", "RIGHT$", "MID$", "GO",
    // BASIC 3.5 and 7.0
    "RGR", "RCLR", "RLUM", "JOY",
    "RDOT", "DEC", "HEX$", "ERR", "INSTR", "ELSE", "RESUME", "TRAP",
    "TRON", "TROFF", "SOUND", "VOL", "AUTO", "PUDEF", "GRAPHIC", "PAINT",
    "CHAR", "BOX", "CIRCLE", "GSHAPE", "SSHAPE", "DRAW", "LOCATE", "COLOR",
    "SCNCLR", "SCALE", "HELP", "DO", "LOOP", "EXIT", "DIRECTORY", "DSAVE",
    "DLOAD", "HEADER", "SCRATCH", "COLLECT", "COPY", "RENAME", "BACKUP", "DELETE",
    "RENUMBER", "KEY", "MONITOR", "USING", "UNTIL", "WHILE"
];

/// Graphics characters `$60..=$7F`, repeated at `$C0..=$DF`.
const GRAPHICS: [char; 32] = [
    '🭹', '♠', '🭲', '🭸', '🭷', '🭶', '🭺', '🭱',
    '🭴', '╮', '╰', '╯', '🭼', '╲', '╱', '🭽',
    '🭾', '●', '🭻', '♥', '🭰', '╭', '╳', '○',
    '♣', '🭵', '♦', '┼', '🮌', '│', 'π', '◥'
];

/// Block characters `$A0..=$BF`, repeated at `$E0..=$FE`.
const BLOCKS: [char; 32] = [
    ' ', '▌', '▄', '▔', '▁', '▏', '▒', '▕',
    '🮏', '◤', '🮇', '├', '▗', '└', '┐', '▂',
    '┌', '┴', '┬', '┤', '▎', '▍', '🮈', '🮂',
    '🮃', '▃', '🭿', '▖', '▝', '┘', '▘', '▚'
];

/// Returns the keyword of a token byte.
pub fn keyword(byte: u8) -> Option<&'static str> {
    byte.checked_sub(FIRST_TOKEN).and_then(|index| KEYWORDS.get(index as usize)).copied()
}

/// Returns the name of a PETSCII control character.
pub fn control_name(byte: u8) -> Option<&'static str> {
    Some(match byte {
        0x03 => "stop",
        0x05 => "white",
        0x08 => "shift disable",
        0x09 => "shift enable",
        0x0d => "return",
        0x0e => "text mode",
        0x11 => "cursor down",
        0x12 => "reverse on",
        0x13 => "home",
        0x14 => "del",
        0x1b => "esc",
        0x1c => "red",
        0x1d => "cursor right",
        0x1e => "green",
        0x1f => "blue",
        0x81 => "orange",
        0x82 => "flash on",
        0x83 => "run",
        0x84 => "flash off",
        0x85 => "f1",
        0x86 => "f3",
        0x87 => "f5",
        0x88 => "f7",
        0x89 => "f2",
        0x8a => "f4",
        0x8b => "f6",
        0x8c => "f8",
        0x8d => "lf",
        0x8e => "graphics mode",
        0x90 => "black",
        0x91 => "cursor up",
        0x92 => "rev off",
        0x93 => "clr",
        0x94 => "insert",
        0x95 => "brown",
        0x96 => "pink",
        0x97 => "dark gray",
        0x98 => "medium gray",
        0x99 => "light green",
        0x9a => "light blue",
        0x9b => "light gray",
        0x9c => "purple",
        0x9d => "cursor left",
        0x9e => "yellow",
        0x9f => "cyan",
        _ => return None
    })
}

/// Converts a PETSCII character in the uppercase mode to Unicode.
///
/// Unassigned control codes are rendered as `.`.
pub fn petscii_to_char(byte: u8) -> char {
    match byte {
        0x20..=0x5b | 0x5d => byte as char,
        0x5c => '£',
        0x5e => '↑',
        0x5f => '←',
        0x60..=0x7f => GRAPHICS[(byte - 0x60) as usize],
        0xa0..=0xbf => BLOCKS[(byte - 0xa0) as usize],
        0xc0..=0xdf => GRAPHICS[(byte - 0xc0) as usize],
        0xe0..=0xfe => BLOCKS[(byte - 0xe0) as usize],
        0xff => 'π',
        _ => '.'
    }
}

/// The reason a listing ended before the end of program marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "report", serde(rename_all = "snake_case"))]
pub enum ListingError {
    /// The program is too short to hold a single line.
    TooShort,
    /// The program ends inside a line header.
    Truncated,
    /// A next line address points backwards, at the line itself or before the program.
    IllegalNextLine { address: u16 },
}

/// A single line of a listed program.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
pub struct BasicLine {
    pub number: u16,
    /// Detokenized text of the line.
    pub text: String,
}

/// A listing of a tokenized BASIC program.
///
/// Formatting with [fmt::Display] renders the listing the way `LIST` would, one line per row
/// with the line number right aligned, followed by the error message if there is one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
pub struct BasicListing {
    pub lines: Vec<BasicLine>,
    pub error: Option<ListingError>,
}

impl BasicListing {
    /// Returns `true` if the whole program was listed.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Detokenizes a single line of text, not including the `0` terminator.
pub fn detokenize(text: &[u8]) -> String {
    let mut line = String::with_capacity(text.len());
    let mut quoted = false;
    for &byte in text {
        if !quoted {
            if let Some(word) = keyword(byte) {
                line.push_str(word);
                continue
            }
        }
        if let Some(name) = control_name(byte) {
            line.push('<');
            line.push_str(name);
            line.push('>');
        }
        else {
            if byte == b'"' {
                quoted = !quoted;
            }
            line.push(petscii_to_char(byte));
        }
    }
    line
}

/// Lists a tokenized BASIC `program` loaded at `load_address`.
///
/// Line positions are resolved from the next line addresses relative to `load_address`.
/// Lines decoded before an error are kept in the listing.
pub fn list_basic(load_address: u16, program: &[u8]) -> BasicListing {
    let mut listing = BasicListing::default();
    if program.len() >= 2 && program[0..2] == [0, 0] {
        return listing
    }
    if program.len() < 5 {
        listing.error = Some(ListingError::TooShort);
        return listing
    }
    let mut pos = 0;
    loop {
        let rest = &program[pos.min(program.len())..];
        if rest.len() >= 2 && rest[0..2] == [0, 0] {
            break
        }
        if rest.len() < 5 {
            debug!("program truncated at ${:04X}", load_address as usize + pos);
            listing.error = Some(ListingError::Truncated);
            break
        }
        let address = u16::from_le_bytes([rest[0], rest[1]]);
        let number = u16::from_le_bytes([rest[2], rest[3]]);
        let text = &rest[4..];
        let text = match text.iter().position(|&b| b == 0) {
            Some(end) => &text[..end],
            None => text
        };
        listing.lines.push(BasicLine { number, text: detokenize(text) });
        let end = pos + 4 + text.len();
        match (address as usize).checked_sub(load_address as usize) {
            Some(next) if next > end => pos = next,
            _ => {
                debug!("line {}: illegal next line address ${:04X}", number, address);
                listing.error = Some(ListingError::IllegalNextLine { address });
                break
            }
        }
    }
    listing
}

impl Error for ListingError {}

impl fmt::Display for ListingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListingError::TooShort => f.write_str("?FILE TOO SHORT ERROR"),
            ListingError::Truncated => f.write_str("?FILE TRUNCATED ERROR"),
            ListingError::IllegalNextLine { .. } => f.write_str("?ILLEGAL NEXT LINE ADDRESS"),
        }
    }
}

impl fmt::Display for BasicLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:6} {}", self.number, self.text)
    }
}

impl fmt::Display for BasicListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines.iter() {
            writeln!(f, "{}", line)?;
        }
        if let Some(err) = self.error {
            writeln!(f, "{}", err)?;
        }
        Ok(())
    }
}
