use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::{Mutex, MutexGuard};

use crate::error::Result;

/// `shard(addr) = addr[len-1] mod N`, per the shard-selection invariant.
pub fn shard_for(addr: &[u8], shard_count: usize) -> usize {
    let last = *addr.last().expect("address must have length >= 1") as usize;
    last % shard_count
}

/// One partition: a file handle plus the mutex serializing every operation
/// scoped to it. The lock is exposed directly (not hidden behind per-call
/// helpers) because the store needs it held across both the meta-store call
/// and the file I/O of a single Put/Get/Has/Delete. Holding one lock across
/// both is what makes the operation's effect on file and meta-store appear
/// atomic to other shard operations.
pub struct Shard {
    pub id: usize,
    file: Mutex<File>,
}

impl Shard {
    pub fn open(directory: &Path, id: usize) -> Result<Self> {
        let path = directory.join(format!("chunks-{id}.db"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        Ok(Self {
            id,
            file: Mutex::new(file),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, File> {
        self.file.lock()
    }

    /// Closes the underlying file. `File`'s `Drop` impl does not report
    /// close errors, so this at least surfaces a failing `fsync`. It is the
    /// seam `Store::close` hooks into to report the first I/O error it sees
    /// while tearing shards down.
    pub fn close(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

/// Writes `section` (already padded to `max_chunk_size`) at `offset`,
/// seeking to end-of-file first when `offset` is negative. Returns the
/// offset actually written at.
pub fn write_section(file: &mut File, offset: i64, section: &[u8]) -> Result<i64> {
    let written_at = if offset < 0 {
        file.seek(SeekFrom::End(0))?
    } else {
        file.seek(SeekFrom::Start(offset as u64))?
    };
    file.write_all(section)?;
    Ok(written_at as i64)
}

/// Reads up to `len` bytes at `offset`. A short read (fewer bytes than
/// `len`) is the caller's responsibility to interpret as corruption.
pub fn read_section(file: &mut File, offset: i64, len: usize) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset as u64))?;
    let mut buf = vec![0u8; len];
    let mut total_read = 0;
    loop {
        match file.read(&mut buf[total_read..]) {
            Ok(0) => break,
            Ok(n) => {
                total_read += n;
                if total_read == len {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    buf.truncate(total_read);
    Ok(buf)
}
