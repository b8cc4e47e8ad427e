use primitive_types::H256;

/// An error decoding a canonically-encoded value.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// IO error from Read usage
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The bytes do not describe a valid value
    #[error("malformed encoding: {0}")]
    Malformed(String),
}

/// Simple trait for types with a canonical binary encoding.
pub trait Encode {
    /// Write the canonical encoding to the writer, returning the number of
    /// bytes written.
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: std::io::Write;

    /// Serialize to a vec.
    fn to_vec(&self) -> Vec<u8> {
        let mut buf = vec![];
        self.write_to(&mut buf).expect("!write to vec");
        buf
    }
}

/// Simple trait for types with a canonical binary encoding.
pub trait Decode {
    /// Try to read the canonical encoding from the reader.
    fn read_from<R>(reader: &mut R) -> Result<Self, DecodeError>
    where
        R: std::io::Read,
        Self: Sized;
}

macro_rules! impl_encode_for_uint {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
                where
                    W: std::io::Write,
                {
                    writer.write_all(&self.to_be_bytes())?;
                    Ok(std::mem::size_of::<$t>())
                }
            }

            impl Decode for $t {
                fn read_from<R>(reader: &mut R) -> Result<Self, DecodeError>
                where
                    R: std::io::Read,
                {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    reader.read_exact(&mut buf)?;
                    Ok(<$t>::from_be_bytes(buf))
                }
            }
        )*
    };
}

impl_encode_for_uint!(u8, u32, u64, u128);

impl Encode for H256 {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: std::io::Write,
    {
        writer.write_all(self.as_ref())?;
        Ok(32)
    }
}

impl Decode for H256 {
    fn read_from<R>(reader: &mut R) -> Result<Self, DecodeError>
    where
        R: std::io::Read,
    {
        let mut digest = H256::zero();
        reader.read_exact(digest.as_mut())?;
        Ok(digest)
    }
}

impl Encode for Vec<u8> {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: std::io::Write,
    {
        let len = (self.len() as u32).write_to(writer)?;
        writer.write_all(self)?;
        Ok(len + self.len())
    }
}

impl Decode for Vec<u8> {
    fn read_from<R>(reader: &mut R) -> Result<Self, DecodeError>
    where
        R: std::io::Read,
    {
        let len = u32::read_from(reader)? as usize;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uint_roundtrip() {
        let mut buf = vec![];
        42u32.write_to(&mut buf).unwrap();
        7_000_000_000u64.write_to(&mut buf).unwrap();
        u128::MAX.write_to(&mut buf).unwrap();

        let mut reader = buf.as_slice();
        assert_eq!(u32::read_from(&mut reader).unwrap(), 42);
        assert_eq!(u64::read_from(&mut reader).unwrap(), 7_000_000_000);
        assert_eq!(u128::read_from(&mut reader).unwrap(), u128::MAX);
    }

    #[test]
    fn bytes_roundtrip() {
        let payload = b"arbitrary payload".to_vec();
        let mut buf = vec![];
        payload.write_to(&mut buf).unwrap();
        assert_eq!(Vec::<u8>::read_from(&mut buf.as_slice()).unwrap(), payload);
    }

    #[test]
    fn truncated_read_errors() {
        let mut buf = vec![];
        1234u64.write_to(&mut buf).unwrap();
        buf.truncate(4);
        assert!(u64::read_from(&mut buf.as_slice()).is_err());
    }
}
