/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
//! Saving recovered files on the host file system.
use core::fmt;
use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use cbmtape::formats::kernal::{petscii_to_ascii, RecoveredFile};

/// An error returned when a recovered file could not be saved.
#[derive(Debug)]
pub struct ExportError {
    /// The path of the file or directory that failed.
    pub path: PathBuf,
    pub source: io::Error,
}

impl Error for ExportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "can't write {}: {}", self.path.display(), self.source)
    }
}

impl From<ExportError> for io::Error {
    fn from(err: ExportError) -> Self {
        io::Error::new(err.source.kind(), err)
    }
}

/// Converts a raw filename to a name safe to use on the host file system.
///
/// Characters without a printable ASCII counterpart and path separators are replaced with `_`.
/// Names consisting only of dots are escaped and empty names become `untitled`.
pub fn sanitize_filename(name: &[u8]) -> String {
    let name: String = name.iter().map(|&byte| match petscii_to_ascii(byte) {
        Some('/')|Some('\\')|Some(':')|Some('*')|Some('?')|Some('"')|Some('<')|Some('>')|Some('|') => '_',
        Some(ch) => ch,
        None => '_'
    }).collect();
    let name = name.trim();
    if name.is_empty() {
        "untitled".to_string()
    }
    else if name.chars().all(|ch| ch == '.') {
        name.replace('.', "_dot_")
    }
    else {
        name.to_string()
    }
}

/// Returns the name under which the `index`-th file is saved.
pub fn export_name(index: usize, file: &RecoveredFile) -> String {
    format!("{:02}_{}.{}", index, sanitize_filename(&file.filename), file.file_type.extension())
}

/// Writes the content of a recovered file.
///
/// Programs are preceded by their load address, as in the common `.prg` files.
pub fn write_file<W: Write>(mut wr: W, file: &RecoveredFile) -> io::Result<()> {
    if file.file_type.is_program() {
        wr.write_all(&file.load_address.to_le_bytes())?;
    }
    wr.write_all(&file.content)?;
    wr.flush()
}

/// Saves recovered files in the directory `dir`, creating it if necessary.
///
/// Files are numbered in the order of recording, as tapes commonly contain many files
/// with the same name. Returns paths of the saved files.
pub fn export_files<P: AsRef<Path>>(dir: P, files: &[RecoveredFile]) -> Result<Vec<PathBuf>, ExportError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|source| ExportError { path: dir.to_path_buf(), source })?;
    let mut paths = Vec::with_capacity(files.len());
    for (index, file) in files.iter().enumerate() {
        let path = dir.join(export_name(index, file));
        fs::File::create(&path)
            .and_then(|fd| write_file(io::BufWriter::new(fd), file))
            .map_err(|source| ExportError { path: path.clone(), source })?;
        info!("saved: {}", path.display());
        paths.push(path);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};
    use cbmtape::audio::Polarity;
    use cbmtape::formats::kernal::{FileType, Header};
    use super::*;

    fn recovered(header: &Header, content: &[u8]) -> RecoveredFile {
        RecoveredFile {
            filename: header.name.clone(),
            file_type: header.file_type,
            load_address: header.load_address,
            end_address: header.end_address,
            content: content.to_vec(),
            checksum_valid: true,
            truncated: false,
            channel: 0,
            polarity: Polarity::Normal,
            start: 0,
            end: 0
        }
    }

    #[test]
    fn sanitize_filename_works() {
        assert_eq!(sanitize_filename(b"GAME"), "GAME");
        assert_eq!(sanitize_filename(b"A/B:C"), "A_B_C");
        assert_eq!(sanitize_filename(b"\x93HELLO"), "_HELLO");
        assert_eq!(sanitize_filename(b""), "untitled");
        assert_eq!(sanitize_filename(b"   "), "untitled");
        assert_eq!(sanitize_filename(b".."), "_dot__dot_");
        assert_eq!(sanitize_filename(b"hi"), "HI");
    }

    #[test]
    fn export_files_works() {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
        let dir = std::env::temp_dir().join(format!("cbmtape-export-{}-{}", std::process::id(), nanos));
        let files = vec![
            recovered(&Header::new_program(0x0801, 3).with_name("GAME"), &[1, 2, 3]),
            recovered(&Header::new(FileType::SeqFile, 0, 0).with_name("GAME"), b"TEXT"),
        ];
        let paths = export_files(&dir, &files).unwrap();
        assert_eq!(paths, vec![dir.join("00_GAME.prg"), dir.join("01_GAME.seq")]);
        assert_eq!(fs::read(&paths[0]).unwrap(), vec![0x01, 0x08, 1, 2, 3]);
        assert_eq!(fs::read(&paths[1]).unwrap(), b"TEXT".to_vec());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn export_errors() {
        let file = dir_blocker();
        let files = vec![recovered(&Header::new_program(0x0801, 1), &[0])];
        let err = export_files(file.join("sub"), &files).unwrap_err();
        assert_eq!(err.path, file.join("sub"));
        assert!(err.to_string().starts_with("can't write"));
        fs::remove_file(&file).unwrap();
    }

    fn dir_blocker() -> PathBuf {
        let path = std::env::temp_dir().join(format!("cbmtape-blocker-{}", std::process::id()));
        fs::write(&path, b"not a directory").unwrap();
        path
    }
}
