use std::path::PathBuf;
use std::{io, path::Path, sync::Arc};

use rocksdb::{Options, DB as Rocks};
use tracing::info;

use crate::encode::{Decode, DecodeError, Encode};

pub use courier_db::CourierDB;
pub use iterator::PrefixIterator;
pub use typed_db::TypedDB;

/// DB operations tied to the Courier data model
mod courier_db;
/// Shared functionality surrounding use of rocksdb
mod iterator;
/// Type-specific db operations
mod typed_db;

/// A KV store
#[derive(Debug, Clone)]
pub struct DB(Arc<Rocks>);

impl From<Rocks> for DB {
    fn from(rocks: Rocks) -> Self {
        Self(Arc::new(rocks))
    }
}

/// DB error type
#[derive(thiserror::Error, Debug)]
pub enum DbError {
    /// Rocks DB error
    #[error("{0}")]
    RockError(#[from] rocksdb::Error),
    /// Error opening the database
    #[error("failed to open {path}, canonicalized as {canonicalized}: {source}")]
    OpeningError {
        /// Rocksdb error during opening
        #[source]
        source: rocksdb::Error,
        /// Raw database path provided
        path: PathBuf,
        /// Parsed path used
        canonicalized: PathBuf,
    },
    /// Could not parse the provided database path string
    #[error("invalid database path supplied {1:?}; {0}")]
    InvalidDbPath(#[source] io::Error, String),
    /// A stored value failed to decode
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

type Result<T> = std::result::Result<T, DbError>;

impl DB {
    /// Opens db at `db_path` and creates if missing
    #[tracing::instrument(err)]
    pub fn from_path(db_path: &Path) -> Result<DB> {
        let path = {
            let mut path = db_path
                .parent()
                .unwrap_or(Path::new("."))
                .canonicalize()
                .map_err(|e| DbError::InvalidDbPath(e, db_path.to_string_lossy().into()))?;
            if let Some(file_name) = db_path.file_name() {
                path.push(file_name);
            }
            path
        };

        if path.is_dir() {
            info!(path=%path.to_string_lossy(), "Opening existing db")
        } else {
            info!(path=%path.to_string_lossy(), "Creating db")
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);

        Rocks::open(&opts, &path)
            .map_err(|e| DbError::OpeningError {
                source: e,
                path: db_path.into(),
                canonicalized: path,
            })
            .map(Into::into)
    }

    /// Store a value in the DB
    pub fn store(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Ok(self.0.put(key, value)?)
    }

    /// Retrieve a value from the DB
    pub fn retrieve(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.0.get(key)?)
    }

    /// Delete a value from the DB
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        Ok(self.0.delete(key)?)
    }

    /// Prefix-keyed store of an encodable value
    pub fn store_encodable<V: Encode>(
        &self,
        prefix: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
        value: &V,
    ) -> Result<()> {
        self.store(&full_key(prefix, key), &value.to_vec())
    }

    /// Prefix-keyed retrieve of a decodable value
    pub fn retrieve_decodable<V: Decode>(
        &self,
        prefix: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<V>> {
        self.retrieve(&full_key(prefix, key))?
            .map(|v| V::read_from(&mut v.as_slice()).map_err(Into::into))
            .transpose()
    }

    /// Prefix-keyed delete
    pub fn delete_key(&self, prefix: impl AsRef<[u8]>, key: impl AsRef<[u8]>) -> Result<()> {
        self.delete(&full_key(prefix, key))
    }

    /// Store an encodable kv pair under a prefix
    pub fn store_keyed_encodable<K: Encode, V: Encode>(
        &self,
        prefix: impl AsRef<[u8]>,
        key: &K,
        value: &V,
    ) -> Result<()> {
        self.store_encodable(prefix, key.to_vec(), value)
    }

    /// Retrieve a decodable value given an encodable key under a prefix
    pub fn retrieve_keyed_decodable<K: Encode, V: Decode>(
        &self,
        prefix: impl AsRef<[u8]>,
        key: &K,
    ) -> Result<Option<V>> {
        self.retrieve_decodable(prefix, key.to_vec())
    }

    /// Iterate over the decodable values stored under a prefix
    pub fn prefix_iterator<V: Decode>(&self, prefix: &[u8]) -> PrefixIterator<'_, V> {
        PrefixIterator::new(self.0.prefix_iterator(prefix), prefix.to_vec())
    }
}

fn full_key(prefix: impl AsRef<[u8]>, key: impl AsRef<[u8]>) -> Vec<u8> {
    let mut full = vec![];
    full.extend(prefix.as_ref());
    full.extend(key.as_ref());
    full
}
