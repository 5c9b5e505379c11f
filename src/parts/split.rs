//! Slicing a logical file into parts.
//!
//! Encoding is two-phase: [`plan`] learns `total_parts` from the file size,
//! then [`read_part`] + [`super::encode`] produce each part with its final
//! metadata. Nothing is ever rewritten after it is produced.

use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use super::error::PartError;

/// Number of parts for a file of `file_size` bytes. An empty file still
/// yields one (empty) part.
pub fn plan(file_size: u64, part_size: u64) -> Result<u32, PartError> {
    if file_size == 0 || part_size == 0 {
        return Ok(1);
    }
    u32::try_from(file_size.div_ceil(part_size)).map_err(|_| PartError::TooManyParts {
        size: file_size,
        part_size,
    })
}

/// Pure slicing of an in-memory buffer. Uploads read slices by offset with
/// [`read_part`] instead.
#[cfg(test)]
pub fn split(bytes: &[u8], part_size: usize) -> Vec<&[u8]> {
    if bytes.is_empty() || part_size == 0 {
        return vec![bytes];
    }
    bytes.chunks(part_size).collect()
}

/// Read slice `index` of `path` by offset. Blocking; call from the blocking pool.
pub fn read_part(path: &Path, index: u32, part_size: u64) -> io::Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(u64::from(index) * part_size))?;
    let mut buf = Vec::with_capacity(part_size as usize);
    file.take(part_size).read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan() {
        assert_eq!(plan(0, 4).unwrap(), 1);
        assert_eq!(plan(1, 4).unwrap(), 1);
        assert_eq!(plan(4, 4).unwrap(), 1);
        assert_eq!(plan(5, 4).unwrap(), 2);
        assert_eq!(plan(100 * 1024 * 1024, 4 * 1024 * 1024).unwrap(), 25);
    }

    #[test]
    fn test_plan_rejects_part_count_overflow() {
        let max = u64::from(u32::MAX);
        assert_eq!(plan(max, 1).unwrap(), u32::MAX);
        assert!(matches!(
            plan(max + 1, 1),
            Err(PartError::TooManyParts { size, part_size: 1 }) if size == max + 1
        ));
    }

    #[test]
    fn test_split_sizes() {
        let data = vec![7u8; 10];
        let parts = split(&data, 4);
        assert_eq!(
            parts.iter().map(|p| p.len()).collect::<Vec<_>>(),
            vec![4, 4, 2]
        );
        assert_eq!(split(&[], 4), vec![&[] as &[u8]]);
    }

    #[test]
    fn test_split_concat_round_trip() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 31 % 256) as u8).collect();
        for part_size in [1usize, 3, 7, 64, 999, 1000, 4096] {
            let parts = split(&data, part_size);
            let total = plan(data.len() as u64, part_size as u64).unwrap();
            assert_eq!(parts.len() as u32, total);
            assert_eq!(parts.concat(), data);
        }
    }

    #[test]
    fn test_read_part_matches_split() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let data: Vec<u8> = (0..=200u8).collect();
        std::fs::write(&path, &data).unwrap();

        let expected = split(&data, 64);
        for (i, slice) in expected.iter().enumerate() {
            assert_eq!(read_part(&path, i as u32, 64).unwrap(), *slice);
        }
        // past EOF reads empty
        assert!(read_part(&path, 10, 64).unwrap().is_empty());
    }
}
