use std::marker::PhantomData;

use rocksdb::DBIterator;
use tracing::warn;

use crate::encode::Decode;

/// An iterator over a key prefix that deserializes values.
///
/// Stops at the first key outside the prefix; rocksdb iterates the whole
/// keyspace from the seek point otherwise.
pub struct PrefixIterator<'a, V> {
    iter: DBIterator<'a>,
    prefix: Vec<u8>,
    _phantom: PhantomData<*const V>,
}

impl<'a, V> PrefixIterator<'a, V> {
    pub(crate) fn new(iter: DBIterator<'a>, prefix: Vec<u8>) -> Self {
        Self {
            iter,
            prefix,
            _phantom: PhantomData,
        }
    }
}

impl<'a, V> Iterator for PrefixIterator<'a, V>
where
    V: Decode,
{
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (key, value) = match self.iter.next()? {
                Ok(kv) => kv,
                Err(e) => {
                    warn!(error = %e, "rocksdb iterator error");
                    return None;
                }
            };
            if !key.starts_with(&self.prefix) {
                return None;
            }
            match V::read_from(&mut value.as_ref()) {
                Ok(v) => return Some(v),
                Err(e) => {
                    warn!(error = %e, key = %hex::encode(&key), "skipping corrupt db value");
                    continue;
                }
            }
        }
    }
}
