//! Input and run file discovery.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name marker of source files. The source identifier is the part of the name before the marker.
pub const SOURCE_MARKER: &str = ".txt";

/// File name extension of run files.
pub const RUN_EXTENSION: &str = ".dat";

/// A source file to be merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Identifier written into every output record of this source.
    pub id: Arc<str>,
    pub path: PathBuf,
    /// File size in bytes.
    pub len: u64,
}

fn file_names(dir: &Path) -> io::Result<Vec<(String, PathBuf, u64)>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push((name.to_string(), entry.path(), metadata.len()));
        }
    }
    Ok(names)
}

/// Lists the source files of `dir` whose names contain `marker`, sorted by source identifier.
pub fn find_sources(dir: &Path, marker: &str) -> io::Result<Vec<SourceFile>> {
    let mut sources: Vec<SourceFile> = file_names(dir)?
        .into_iter()
        .filter_map(|(name, path, len)| {
            let pos = name.find(marker)?;
            Some(SourceFile {
                id: Arc::from(&name[..pos]),
                path,
                len,
            })
        })
        .collect();

    sources.sort_by(|a, b| a.id.cmp(&b.id));
    return Ok(sources);
}

/// Lists the run files of `dir`, the files named `<prefix><index><extension>` with a decimal `index`,
/// ordered by index. Anything else in the directory, the final output included, is left out.
pub fn find_runs(dir: &Path, prefix: &str, extension: &str) -> io::Result<Vec<PathBuf>> {
    let mut runs: Vec<(u64, PathBuf)> = file_names(dir)?
        .into_iter()
        .filter_map(|(name, path, _)| run_index(&name, prefix, extension).map(|index| (index, path)))
        .collect();

    runs.sort();
    return Ok(runs.into_iter().map(|(_, path)| path).collect());
}

fn run_index(name: &str, prefix: &str, extension: &str) -> Option<u64> {
    let index = name.strip_prefix(prefix)?.strip_suffix(extension)?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    return index.parse().ok();
}

#[cfg(test)]
mod test {
    use std::fs;

    use rstest::*;

    use super::{find_runs, find_sources, run_index, RUN_EXTENSION, SOURCE_MARKER};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "MSFT.txt",
            "AAPL.txt",
            "notes.md",
            "output_1.dat",
            "output_0.dat",
            "output_10.dat",
            "output_2.dat",
            "output_x.dat",
            "output_.dat",
            "run_3.dat",
            "MKTDATA.dat",
        ] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        fs::create_dir(dir.path().join("IBM.txt")).unwrap();
        dir
    }

    #[rstest]
    fn test_find_sources(tmp_dir: tempfile::TempDir) {
        let sources = find_sources(tmp_dir.path(), SOURCE_MARKER).unwrap();

        let ids: Vec<&str> = sources.iter().map(|s| s.id.as_ref()).collect();
        assert_eq!(ids, vec!["AAPL", "MSFT"]);
        assert_eq!(sources[0].path, tmp_dir.path().join("AAPL.txt"));
        assert_eq!(sources[0].len, "AAPL.txt".len() as u64);
    }

    #[rstest]
    fn test_find_runs(tmp_dir: tempfile::TempDir) {
        let runs = find_runs(tmp_dir.path(), "output_", RUN_EXTENSION).unwrap();

        assert_eq!(
            runs,
            vec![
                tmp_dir.path().join("output_0.dat"),
                tmp_dir.path().join("output_1.dat"),
                tmp_dir.path().join("output_2.dat"),
                tmp_dir.path().join("output_10.dat"),
            ]
        );
    }

    #[rstest]
    fn test_find_runs_other_prefix(tmp_dir: tempfile::TempDir) {
        let runs = find_runs(tmp_dir.path(), "run_", RUN_EXTENSION).unwrap();

        assert_eq!(runs, vec![tmp_dir.path().join("run_3.dat")]);
    }

    #[rstest]
    #[case("output_7.dat", Some(7))]
    #[case("output_007.dat", Some(7))]
    #[case("output_.dat", None)]
    #[case("output_1a.dat", None)]
    #[case("output_-1.dat", None)]
    #[case("output_1.txt", None)]
    #[case("MKTDATA.dat", None)]
    fn test_run_index(#[case] name: &str, #[case] expected: Option<u64>) {
        assert_eq!(run_index(name, "output_", RUN_EXTENSION), expected);
    }

    #[test]
    fn test_missing_dir() {
        assert!(find_sources(std::path::Path::new("/nonexistent/ext-merge"), SOURCE_MARKER).is_err());
    }
}
