//! Database file naming.
//!
//! All files owned by a database live directly in its directory:
//!
//! ```text
//! CURRENT                 one line: the name of the live manifest
//! LOCK                    exclusive lock file
//! LOG, LOG.old            human-readable info log
//! MANIFEST-NNNNNN         version-edit log
//! NNNNNN.log              write-ahead log
//! NNNNNN.ldb, NNNNNN.sst  table file (".sst" accepted for
//!                         compatibility with older builds; ".ldb" is
//!                         what gets written)
//! NNNNNN.dbtmp            transient file, renamed atomically into place
//! ```
//!
//! `NNNNNN` is the zero-padded six-digit decimal of a 64-bit file number
//! (more digits when the number outgrows six). Parsing is
//! locale-independent: only ASCII digits are accepted.

use std::path::{Path, PathBuf};

/// The role a database file plays, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// `NNNNNN.log`: write-ahead log.
    Log,
    /// `LOCK`.
    DbLock,
    /// `NNNNNN.ldb` or `NNNNNN.sst`: table file.
    Table,
    /// `MANIFEST-NNNNNN`: version-edit log.
    Descriptor,
    /// `CURRENT`.
    Current,
    /// `NNNNNN.dbtmp`.
    Temp,
    /// `LOG` or `LOG.old`.
    InfoLog,
}

fn make_file_name(dbname: &Path, number: u64, suffix: &str) -> PathBuf {
    dbname.join(format!("{number:06}.{suffix}"))
}

/// `NNNNNN.log`
pub fn log_file_name(dbname: &Path, number: u64) -> PathBuf {
    debug_assert!(number > 0);
    make_file_name(dbname, number, "log")
}

/// `NNNNNN.ldb`, the name written for new tables.
pub fn table_file_name(dbname: &Path, number: u64) -> PathBuf {
    debug_assert!(number > 0);
    make_file_name(dbname, number, "ldb")
}

/// `NNNNNN.sst`, the legacy table name, accepted on read.
pub fn sst_table_file_name(dbname: &Path, number: u64) -> PathBuf {
    debug_assert!(number > 0);
    make_file_name(dbname, number, "sst")
}

/// `MANIFEST-NNNNNN`
pub fn descriptor_file_name(dbname: &Path, number: u64) -> PathBuf {
    debug_assert!(number > 0);
    dbname.join(format!("MANIFEST-{number:06}"))
}

/// `CURRENT`
pub fn current_file_name(dbname: &Path) -> PathBuf {
    dbname.join("CURRENT")
}

/// `LOCK`
pub fn lock_file_name(dbname: &Path) -> PathBuf {
    dbname.join("LOCK")
}

/// `NNNNNN.dbtmp`
pub fn temp_file_name(dbname: &Path, number: u64) -> PathBuf {
    debug_assert!(number > 0);
    make_file_name(dbname, number, "dbtmp")
}

/// `LOG`
pub fn info_log_file_name(dbname: &Path) -> PathBuf {
    dbname.join("LOG")
}

/// `LOG.old`
pub fn old_info_log_file_name(dbname: &Path) -> PathBuf {
    dbname.join("LOG.old")
}

/// Parse a decimal number off the front of `input`, advancing past the
/// digits consumed.
///
/// Locale-independent and overflow-checked: fails on a non-ASCII-digit
/// first byte and on values exceeding `u64`.
fn consume_decimal_number(input: &mut &str, value: &mut u64) -> bool {
    const LAST_DIGIT_OF_MAX: u8 = (u64::MAX % 10) as u8;

    let mut result: u64 = 0;
    let mut digits = 0;
    let bytes = input.as_bytes();
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            break;
        }
        let digit = byte - b'0';
        // Overflow check without division on the hot path.
        if result > u64::MAX / 10 || (result == u64::MAX / 10 && digit > LAST_DIGIT_OF_MAX) {
            return false;
        }
        result = result * 10 + u64::from(digit);
        digits += 1;
    }

    if digits == 0 {
        return false;
    }
    *value = result;
    *input = &input[digits..];
    true
}

/// Recognise a database-owned file by its basename.
///
/// Returns the embedded file number (0 for the fixed names) and the file
/// type, or `None` for anything this database would not have created.
pub fn parse_file_name(filename: &str) -> Option<(u64, FileType)> {
    let mut rest = filename;
    if rest == "CURRENT" {
        Some((0, FileType::Current))
    } else if rest == "LOCK" {
        Some((0, FileType::DbLock))
    } else if rest == "LOG" || rest == "LOG.old" {
        Some((0, FileType::InfoLog))
    } else if let Some(suffix) = rest.strip_prefix("MANIFEST-") {
        let mut rest = suffix;
        let mut number = 0;
        if !consume_decimal_number(&mut rest, &mut number) || !rest.is_empty() {
            return None;
        }
        Some((number, FileType::Descriptor))
    } else {
        let mut number = 0;
        if !consume_decimal_number(&mut rest, &mut number) {
            return None;
        }
        let file_type = match rest {
            ".log" => FileType::Log,
            ".sst" | ".ldb" => FileType::Table,
            ".dbtmp" => FileType::Temp,
            _ => return None,
        };
        Some((number, file_type))
    }
}
