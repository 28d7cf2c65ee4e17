//! On-disk spool for downloaded fragments.
//!
//! Fragments are flushed here as they arrive so that verification and
//! reassembly can read them back one at a time.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use shardline_core::{Fragment, Result};
use tracing::debug;

/// A directory of `downloaded_part_NNNNN.bin` files.
#[derive(Debug, Clone)]
pub struct FragmentSpool {
    dir: PathBuf,
}

impl FragmentSpool {
    /// Use `dir`, creating it if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, index: usize) -> PathBuf {
        self.dir.join(format!("downloaded_part_{:05}.bin", index))
    }

    pub fn write(&self, fragment: &Fragment) -> Result<()> {
        let path = self.path_for(fragment.index());
        fs::write(&path, fragment.bytes())?;
        debug!(fragment = fragment.index(), bytes = fragment.len(), path = %path.display(), "spooled fragment");
        Ok(())
    }

    /// Read fragment `index` back, reusing `buf` for its bytes.
    pub fn read(&self, index: usize, offset: u64, mut buf: Vec<u8>) -> Result<Fragment> {
        buf.clear();
        File::open(self.path_for(index))?.read_to_end(&mut buf)?;
        Ok(Fragment::new(index, offset, buf))
    }

    /// Delete spooled fragments `0..count`. Missing files are ignored.
    pub fn clear(&self, count: usize) -> Result<()> {
        for index in 0..count {
            match fs::remove_file(self.path_for(index)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
