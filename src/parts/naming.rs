//! Remote path scheme for part containers.
//!
//! Remote paths are always `/`-separated and repository-relative.

/// Suffix that marks a directory as the part container of a logical file.
pub const CONTAINER_SUFFIX: &str = ".parts";

/// Last `/`-separated segment of a remote path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Join two remote path fragments, tolerating an empty root.
pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// `docs/report.docx` → `docs/report.docx.parts`
pub fn container_path(logical_path: &str) -> String {
    format!("{logical_path}{CONTAINER_SUFFIX}")
}

/// `docs/report.docx`, 3 → `docs/report.docx.parts/report.docx.part3.txt`
pub fn part_path(logical_path: &str, index: u32) -> String {
    join(
        &container_path(logical_path),
        &part_file_name(file_name(logical_path), index),
    )
}

pub fn part_file_name(original_name: &str, index: u32) -> String {
    format!("{original_name}.part{index}.txt")
}

/// Inverse of [`container_path`]: the logical path a container stands for.
pub fn logical_path_of_container(container: &str) -> Option<&str> {
    let base = container.strip_suffix(CONTAINER_SUFFIX)?;
    if file_name(base).is_empty() {
        None
    } else {
        Some(base)
    }
}

pub fn is_container_name(name: &str) -> bool {
    name.len() > CONTAINER_SUFFIX.len() && name.ends_with(CONTAINER_SUFFIX)
}

/// Parse `N` out of `<original_name>.part<N>.txt`.
///
/// The prefix must equal `original_name` exactly, so `report.docx.old.part0.txt`
/// is not a part of `report.docx`.
pub fn parse_part_index(original_name: &str, candidate: &str) -> Option<u32> {
    let digits = candidate
        .strip_prefix(original_name)?
        .strip_prefix(".part")?
        .strip_suffix(".txt")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Index from any name ending in `.part<N>.txt`, regardless of prefix.
pub fn trailing_part_index(candidate: &str) -> Option<u32> {
    let stem = candidate.strip_suffix(".txt")?;
    let (_, digits) = stem.rsplit_once(".part")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
