//! Encoding of the user table to and from durable storage.
//!
//! The on-disk document holds the id counter and every record:
//!
//! ```text
//! {"Users":{"1":{"ID":1,"Name":"Petya","Age":20}},"Counter":1}
//! ```
//!
//! The same document can also be written as MessagePack with named fields.
//! Field names never change between versions.

use crate::error::{Result, StoreError};
use crate::store::Table;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// On-disk encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    #[default]
    Json,
    MessagePack,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Json => write!(f, "json"),
            Format::MessagePack => write!(f, "msgpack"),
        }
    }
}

impl FromStr for Format {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "msgpack" | "messagepack" | "mp" => Ok(Format::MessagePack),
            other => Err(StoreError::InvalidConfig(format!(
                "unknown format '{}', expected json or msgpack",
                other
            ))),
        }
    }
}

/// Serializes and deserializes a [`Table`] in a fixed schema.
#[derive(Clone, Copy, Debug, Default)]
pub struct Codec {
    format: Format,
}

impl Codec {
    pub fn new(format: Format) -> Self {
        Self { format }
    }

    /// Encode the table in a single pass.
    pub fn encode(&self, table: &Table) -> Result<Vec<u8>> {
        match self.format {
            Format::Json => {
                let mut buf = serde_json::to_vec(table)?;
                buf.push(b'\n');
                Ok(buf)
            }
            Format::MessagePack => Ok(rmp_serde::to_vec_named(table)?),
        }
    }

    /// Decode a table from raw bytes and check its invariants.
    pub fn decode(&self, bytes: &[u8]) -> Result<Table> {
        let table: Table = match self.format {
            Format::Json => serde_json::from_slice(bytes)
                .map_err(|e| StoreError::Deserialization(e.to_string()))?,
            Format::MessagePack => rmp_serde::from_slice(bytes)?,
        };
        table.validate().map_err(StoreError::Deserialization)?;
        Ok(table)
    }

    /// Read a full table from `reader`.
    pub fn load<R: Read>(&self, mut reader: R) -> Result<Table> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        self.decode(&bytes)
    }

    /// Write the table to `writer`.
    pub fn save<W: Write>(&self, table: &Table, mut writer: W) -> Result<()> {
        let bytes = self.encode(table)?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }
}

/// The single file that holds the store's durable state.
#[derive(Clone, Debug)]
pub struct DataFile {
    path: PathBuf,
    codec: Codec,
}

impl DataFile {
    pub fn new(path: impl AsRef<Path>, format: Format) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            codec: Codec::new(format),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Load the stored table.
    ///
    /// A missing file is not an error: the store starts empty with counter
    /// zero. Any other failure is reported as [`StoreError::Load`].
    pub fn load(&self) -> Result<Table> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "data file not found, starting empty");
                return Ok(Table::default());
            }
            Err(e) => return Err(self.load_error(e)),
        };

        let table = self
            .codec
            .load(BufReader::new(file))
            .map_err(|e| self.load_error(e))?;

        info!(
            path = %self.path.display(),
            users = table.users.len(),
            counter = table.counter,
            "loaded data file"
        );
        Ok(table)
    }

    /// Encode and write the table.
    pub fn save(&self, table: &Table) -> Result<()> {
        let bytes = self.codec.encode(table).map_err(|e| self.save_error(e))?;
        self.write(&bytes)
    }

    /// Replace the file's contents with already encoded bytes.
    ///
    /// The bytes go to a sibling temporary file which is synced and then
    /// renamed over the target, so readers never see a truncated file.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        self.write_atomic(bytes).map_err(|e| self.save_error(e))?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "wrote data file");
        Ok(())
    }

    fn write_atomic(&self, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.temp_path();
        let result = write_synced(&tmp, bytes).and_then(|()| fs::rename(&tmp, &self.path));
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn load_error(&self, e: impl fmt::Display) -> StoreError {
        StoreError::Load {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }

    fn save_error(&self, e: impl fmt::Display) -> StoreError {
        StoreError::Save {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
