use crate::layout::StoreLayout;
use crate::StoreError;
use layerscope_schema::Digest;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// Content-addressable cache of file contents, keyed by blake3.
///
/// Objects are stored as files named by their blake3 hash. Writes go through a
/// `NamedTempFile` and are renamed into place; reads verify integrity by
/// recomputing the hash.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    layout: StoreLayout,
}

/// Forwards writes to the temp file while feeding the hasher.
struct HashingWriter<'a, W> {
    inner: W,
    hasher: &'a mut blake3::Hasher,
    written: u64,
}

impl<W: Write> Write for HashingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl ObjectStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Where the object named `hash` lives.
    pub fn path(&self, hash: &str) -> PathBuf {
        self.layout.objects_dir().join(hash)
    }

    /// Stream `reader` into the store, hashing as it is written.
    ///
    /// Returns the digest and the number of bytes consumed. Objects ingested
    /// this way are reproducible from their source archive and are not fsynced.
    pub fn put_reader(&self, reader: &mut impl Read) -> Result<(Digest, u64), StoreError> {
        let dir = self.layout.objects_dir();
        let mut tmp = NamedTempFile::new_in(&dir)?;
        let mut hasher = blake3::Hasher::new();
        let written = {
            let mut writer = HashingWriter {
                inner: tmp.as_file_mut(),
                hasher: &mut hasher,
                written: 0,
            };
            io::copy(reader, &mut writer)?;
            writer.written
        };
        let hash = hasher.finalize().to_hex().to_string();
        let dest = dir.join(&hash);
        if !dest.exists() {
            tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        }
        Ok((Digest::new(hash), written))
    }

    /// Retrieve data by hash, verifying integrity on read.
    pub fn get(&self, hash: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path(hash);
        if !path.exists() {
            return Err(StoreError::ObjectNotFound(hash.to_owned()));
        }
        let data = fs::read(&path)?;

        let actual = blake3::hash(&data);
        let actual_hex = actual.to_hex();
        if actual_hex.as_str() != hash {
            return Err(StoreError::IntegrityFailure {
                hash: hash.to_owned(),
                expected: hash.to_owned(),
                actual: actual_hex.to_string(),
            });
        }

        Ok(data)
    }

    /// Re-hash the object named `hash`, streaming it from disk.
    pub fn verify(&self, hash: &str) -> Result<(), StoreError> {
        let mut file = match fs::File::open(self.path(hash)) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::ObjectNotFound(hash.to_owned()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut hasher = blake3::Hasher::new();
        io::copy(&mut file, &mut hasher)?;
        let actual = hasher.finalize().to_hex();
        if actual.as_str() != hash {
            return Err(StoreError::IntegrityFailure {
                hash: hash.to_owned(),
                expected: hash.to_owned(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.layout.objects_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut hashes = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    hashes.push(name.to_owned());
                }
            }
        }
        hashes.sort();
        Ok(hashes)
    }
}
