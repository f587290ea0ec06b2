//! Result file naming.
//!
//! Files are named `<prefix>_<YYYY_MM_DD>_<nnnn>.<ext>`. The last number handed
//! out is kept in `<prefix>.cnt` next to the results, so numbering continues
//! across days and sessions.

use crate::error::{AnalyserError, AppResult};
use chrono::{Local, NaiveDate};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name for result number `n` taken on `date`.
pub fn result_file_name(prefix: &str, date: NaiveDate, n: u32, ext: &str) -> String {
    format!("{prefix}_{}_{n:04}.{ext}", date.format("%Y_%m_%d"))
}

/// Next free result path in `dir` for today's date.
pub fn next_result_path(dir: impl AsRef<Path>, prefix: &str, ext: &str) -> AppResult<PathBuf> {
    next_result_path_on(dir, prefix, ext, Local::now().date_naive())
}

/// Next free result path in `dir` for `date`.
///
/// Creates `dir` if needed, starts above the stored counter, skips numbers whose
/// file already exists and stores the number it picked. An extension given with
/// a leading dot or as a full file name is cut to its last component.
pub fn next_result_path_on(
    dir: impl AsRef<Path>,
    prefix: &str,
    ext: &str,
    date: NaiveDate,
) -> AppResult<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let counter_file = dir.join(format!("{prefix}.cnt"));
    let mut n = match fs::read_to_string(&counter_file) {
        Ok(text) => text.trim().parse::<u32>().map_err(|_| {
            AnalyserError::CorruptFile(format!(
                "counter file {} holds {:?}",
                counter_file.display(),
                text.trim()
            ))
        })?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };

    let ext = ext.rsplit('.').next().unwrap_or(ext);
    let path = loop {
        n += 1;
        let candidate = dir.join(result_file_name(prefix, date, n, ext));
        if !candidate.exists() {
            break candidate;
        }
    };

    fs::write(&counter_file, n.to_string())?;
    debug!(path = %path.display(), counter = n, "Next result file");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 9, 13).unwrap()
    }

    #[test]
    fn formats_name() {
        assert_eq!(
            result_file_name("ZTE", date(), 7, "trc"),
            "ZTE_2022_09_13_0007.trc"
        );
    }

    #[test]
    fn counts_up_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");

        let first = next_result_path_on(&results, "ZTE", ".trc", date()).unwrap();
        assert_eq!(first, results.join("ZTE_2022_09_13_0001.trc"));
        assert_eq!(fs::read_to_string(results.join("ZTE.cnt")).unwrap(), "1");

        let second = next_result_path_on(&results, "ZTE", "trc", date()).unwrap();
        assert_eq!(second, results.join("ZTE_2022_09_13_0002.trc"));
    }

    #[test]
    fn skips_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ZTE_2022_09_13_0001.trc"), b"x").unwrap();
        fs::write(dir.path().join("ZTE_2022_09_13_0002.trc"), b"x").unwrap();
        let path = next_result_path_on(dir.path(), "ZTE", "trc", date()).unwrap();
        assert_eq!(path, dir.path().join("ZTE_2022_09_13_0003.trc"));
    }

    #[test]
    fn garbage_counter_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ZTE.cnt"), "seven").unwrap();
        assert!(matches!(
            next_result_path_on(dir.path(), "ZTE", "trc", date()),
            Err(AnalyserError::CorruptFile(_))
        ));
    }
}
