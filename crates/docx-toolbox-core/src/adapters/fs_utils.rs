use std::path::{Path, PathBuf};

use crate::adapters::document::AdapterResult;
use crate::models::TaskError;

const LOCK_FILE_PREFIX: &str = "~$";

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum InputTarget {
    File(PathBuf),
    Directory(PathBuf),
}

impl InputTarget {
    pub(crate) fn default_output_dir(&self) -> PathBuf {
        match self {
            Self::File(path) => path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            Self::Directory(path) => path.clone(),
        }
    }
}

pub(crate) fn resolve_input(path: &Path) -> AdapterResult<InputTarget> {
    let metadata = std::fs::metadata(path).map_err(|error| match error.kind() {
        std::io::ErrorKind::NotFound => TaskError::invalid_input("input path does not exist")
            .with_detail(path.display().to_string()),
        _ => TaskError::from(error).with_detail(path.display().to_string()),
    })?;

    if metadata.is_dir() {
        return Ok(InputTarget::Directory(path.to_path_buf()));
    }

    if !metadata.is_file() {
        return Err(TaskError::invalid_input("input path is not a file or directory")
            .with_detail(path.display().to_string()));
    }

    if !is_docx(path) {
        return Err(TaskError::unsupported_format("only .docx documents are supported")
            .with_detail(path.display().to_string()));
    }

    Ok(InputTarget::File(path.to_path_buf()))
}

pub(crate) fn is_docx(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("docx"))
}

pub(crate) fn is_lock_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(LOCK_FILE_PREFIX))
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Lists `.docx` files directly inside `dir`, sorted case-insensitively.
/// Sub-directories and Office lock files are left out.
pub(crate) fn collect_docx_files(dir: &Path) -> AdapterResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|error| TaskError::from(error).with_detail(dir.display().to_string()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|error| TaskError::from(error).with_detail(dir.display().to_string()))?;
        let path = entry.path();
        if path.is_dir() || !is_docx(&path) || is_lock_file(&path) {
            continue;
        }
        files.push(path);
    }

    files.sort_by_cached_key(|path| {
        path.file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });
    Ok(files)
}

/// Candidate documents for a request: the file itself, or the filtered
/// directory listing.
pub(crate) fn candidate_documents(
    target: &InputTarget,
    exclude: impl Fn(&str) -> bool,
) -> AdapterResult<Vec<PathBuf>> {
    match target {
        InputTarget::File(path) => Ok(vec![path.clone()]),
        InputTarget::Directory(dir) => Ok(collect_docx_files(dir)?
            .into_iter()
            .filter(|path| !exclude(&file_stem(path)))
            .collect()),
    }
}

/// Rejects an output location that exists but is not a directory, or that the
/// current user cannot write to. A missing directory is judged by its nearest
/// existing ancestor.
pub(crate) fn check_output_dir(path: &Path) -> AdapterResult<()> {
    if path.exists() && !path.is_dir() {
        return Err(TaskError::invalid_input("output path is not a directory")
            .with_detail(path.display().to_string()));
    }

    let mut probe = path;
    while !probe.exists() {
        match probe.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => probe = parent,
            _ => return Ok(()),
        }
    }

    if !probe.is_dir() {
        return Err(TaskError::invalid_input("output path is below a regular file")
            .with_detail(path.display().to_string()));
    }

    if !is_writable(probe) {
        return Err(TaskError::permission_denied("output directory is not writable")
            .with_detail(probe.display().to_string()));
    }

    Ok(())
}

pub(crate) fn ensure_output_dir(path: &Path) -> AdapterResult<()> {
    std::fs::create_dir_all(path)
        .map_err(|error| TaskError::from(error).with_detail(path.display().to_string()))
}

#[cfg(unix)]
fn is_writable(path: &Path) -> bool {
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 }
}

#[cfg(not(unix))]
fn is_writable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|metadata| !metadata.permissions().readonly())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{
        InputTarget, candidate_documents, check_output_dir, collect_docx_files, resolve_input,
    };
    use crate::models::ErrorCode;

    #[test]
    fn missing_input_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let error = resolve_input(&dir.path().join("nope.docx")).unwrap_err();
        assert_eq!(error.code, ErrorCode::InvalidInput);
        assert_eq!(error.message, "input path does not exist");
    }

    #[test]
    fn non_docx_file_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"x").unwrap();
        assert_eq!(resolve_input(&path).unwrap_err().code, ErrorCode::UnsupportedFormat);

        let upper = dir.path().join("Report.DOCX");
        fs::write(&upper, b"x").unwrap();
        assert_eq!(resolve_input(&upper).unwrap(), InputTarget::File(upper));
    }

    #[test]
    fn directory_listing_is_filtered_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.docx", "A.docx", "~$lock.docx", "c.doc", "readme.md"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("nested.docx")).unwrap();

        let names: Vec<String> = collect_docx_files(dir.path())
            .unwrap()
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["A.docx", "b.docx"]);
    }

    #[test]
    fn candidate_filter_applies_to_directories_only() {
        let dir = tempfile::tempdir().unwrap();
        let marked = dir.path().join("a_marked.docx");
        fs::write(&marked, b"x").unwrap();
        fs::write(dir.path().join("b.docx"), b"x").unwrap();

        let exclude = |stem: &str| stem.ends_with("_marked");
        let listed =
            candidate_documents(&InputTarget::Directory(dir.path().to_path_buf()), exclude)
                .unwrap();
        assert_eq!(listed.len(), 1);

        let single = candidate_documents(&InputTarget::File(marked.clone()), exclude).unwrap();
        assert_eq!(single, vec![marked]);
    }

    #[test]
    fn output_path_that_is_a_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out");
        fs::write(&file, b"x").unwrap();
        assert_eq!(check_output_dir(&file).unwrap_err().code, ErrorCode::InvalidInput);
        assert!(check_output_dir(&dir.path().join("fresh/deeper")).is_ok());
    }

    #[test]
    fn default_output_dir_follows_input() {
        let file = InputTarget::File("/data/in/report.docx".into());
        assert_eq!(file.default_output_dir(), std::path::PathBuf::from("/data/in"));
        let bare = InputTarget::File("report.docx".into());
        assert_eq!(bare.default_output_dir(), std::path::PathBuf::from("."));
    }
}
