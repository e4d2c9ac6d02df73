use crate::result::{TerrainError, TerrainResult};
use bevy::log::{debug, warn};
use memmap2::{MmapMut, MmapOptions};
use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

/// The largest region mapped at once.
pub const MAX_SEGMENT_BYTES: usize = i32::MAX as usize;

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Row major scratch storage backed by several memory mapped segments of a temporary file.
///
/// Every segment holds a whole number of rows, so a row never straddles two segments.
/// The buffer has to be released with [`MultiMappedBuffer::dispose`], which unmaps all segments
/// and deletes the scratch file.
pub struct MultiMappedBuffer {
    path: PathBuf,
    file: Option<File>,
    segments: Vec<MmapMut>,
    row_bytes: usize,
    length: usize,
    rows_per_segment: usize,
    disposed: bool,
}

impl MultiMappedBuffer {
    pub fn new(directory: &Path, row_bytes: usize, length: usize) -> TerrainResult<Self> {
        Self::with_segment_size(directory, row_bytes, length, MAX_SEGMENT_BYTES)
    }

    pub fn with_segment_size(
        directory: &Path,
        row_bytes: usize,
        length: usize,
        max_segment_bytes: usize,
    ) -> TerrainResult<Self> {
        if row_bytes == 0 || length == 0 {
            return Err(TerrainError::EmptyRaster(row_bytes, length));
        }

        fs::create_dir_all(directory)?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_millis());
        let counter = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = directory.join(format!("tmp_{millis}_{counter}"));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.set_len((row_bytes * length) as u64)?;

        let rows_per_segment = (max_segment_bytes / row_bytes).clamp(1, length);

        let segments = (0..length)
            .step_by(rows_per_segment)
            .map(|first_row| {
                let rows = rows_per_segment.min(length - first_row);

                // SAFETY: the scratch file is exclusive to this buffer and keeps its size while mapped.
                unsafe {
                    MmapOptions::new()
                        .offset((first_row * row_bytes) as u64)
                        .len(rows * row_bytes)
                        .map_mut(&file)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "Mapped {} bytes of {} in {} segments.",
            row_bytes * length,
            path.display(),
            segments.len()
        );

        Ok(Self {
            path,
            file: Some(file),
            segments,
            row_bytes,
            length,
            rows_per_segment,
            disposed: false,
        })
    }

    #[inline]
    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn rows_per_segment(&self) -> usize {
        self.rows_per_segment
    }

    #[inline]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn locate(&self, row: usize, offset: usize, bytes: usize) -> TerrainResult<(usize, usize)> {
        if row >= self.length || offset + bytes > self.row_bytes {
            return Err(TerrainError::InvalidRegion(bytes, 1, offset, row));
        }

        let segment = row / self.rows_per_segment;
        let start = (row % self.rows_per_segment) * self.row_bytes + offset;

        Ok((segment, start))
    }

    /// Copies `into.len()` bytes of `row`, starting at the byte `offset`.
    pub fn get(&self, row: usize, offset: usize, into: &mut [u8]) -> TerrainResult<()> {
        let (segment, start) = self.locate(row, offset, into.len())?;
        into.copy_from_slice(&self.segments[segment][start..start + into.len()]);

        Ok(())
    }

    pub fn get_row(&self, row: usize, into: &mut [u8]) -> TerrainResult<()> {
        if into.len() != self.row_bytes {
            return Err(TerrainError::BufferSize {
                expected: self.row_bytes,
                actual: into.len(),
            });
        }

        self.get(row, 0, into)
    }

    /// Overwrites `from.len()` bytes of `row`, starting at the byte `offset`.
    pub fn set(&mut self, row: usize, offset: usize, from: &[u8]) -> TerrainResult<()> {
        let (segment, start) = self.locate(row, offset, from.len())?;
        self.segments[segment][start..start + from.len()].copy_from_slice(from);

        Ok(())
    }

    pub fn set_row(&mut self, row: usize, from: &[u8]) -> TerrainResult<()> {
        if from.len() != self.row_bytes {
            return Err(TerrainError::BufferSize {
                expected: self.row_bytes,
                actual: from.len(),
            });
        }

        self.set(row, 0, from)
    }

    /// Writes the same row contents to every row.
    pub fn fill_rows(&mut self, pattern: &[u8]) -> TerrainResult<()> {
        for row in 0..self.length {
            self.set_row(row, pattern)?;
        }

        Ok(())
    }

    pub fn flush(&self) -> TerrainResult<()> {
        for segment in &self.segments {
            segment.flush()?;
        }

        Ok(())
    }

    /// Unmaps all segments and deletes the scratch file.
    pub fn dispose(mut self) -> TerrainResult<()> {
        self.disposed = true;
        self.segments.clear();
        self.file = None;

        fs::remove_file(&self.path)?;

        Ok(())
    }
}

impl Drop for MultiMappedBuffer {
    fn drop(&mut self) {
        if !self.disposed {
            warn!(
                "Scratch buffer {} was dropped without being disposed.",
                self.path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_never_straddle_segments() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = MultiMappedBuffer::with_segment_size(dir.path(), 12, 10, 40).unwrap();

        assert_eq!(buffer.rows_per_segment(), 3);
        assert_eq!(buffer.segment_count(), 4);

        for row in 0..10 {
            buffer.set_row(row, &[row as u8; 12]).unwrap();
        }

        let mut into = [0; 12];
        for row in 0..10 {
            buffer.get_row(row, &mut into).unwrap();
            assert_eq!(into, [row as u8; 12]);
        }

        buffer.set(7, 4, &[42, 43]).unwrap();
        let mut into = [0; 4];
        buffer.get(7, 3, &mut into).unwrap();
        assert_eq!(into, [7, 42, 43, 7]);

        buffer.dispose().unwrap();
    }

    #[test]
    fn single_segment_for_small_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = MultiMappedBuffer::new(dir.path(), 16, 16).unwrap();

        assert_eq!(buffer.segment_count(), 1);
        assert_eq!(buffer.rows_per_segment(), 16);

        buffer.dispose().unwrap();
    }

    #[test]
    fn out_of_bounds_access_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = MultiMappedBuffer::new(dir.path(), 8, 2).unwrap();

        assert!(buffer.get(2, 0, &mut [0; 4]).is_err());
        assert!(buffer.get(0, 6, &mut [0; 4]).is_err());
        assert!(buffer.set_row(0, &[0; 7]).is_err());
        assert!(MultiMappedBuffer::new(dir.path(), 0, 2).is_err());

        buffer.dispose().unwrap();
    }

    #[test]
    fn dispose_removes_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = MultiMappedBuffer::new(dir.path(), 4, 4).unwrap();
        buffer.fill_rows(&[1, 2, 3, 4]).unwrap();
        buffer.flush().unwrap();

        let path = buffer.path().to_path_buf();
        assert!(path.exists());

        buffer.dispose().unwrap();
        assert!(!path.exists());
    }
}
