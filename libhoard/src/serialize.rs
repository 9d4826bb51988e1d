use crate::error::HoardResult;
use std::io::{prelude::*, BufReader};

pub trait Serialize {
    fn serialize(&self, writer: &mut dyn Write) -> HoardResult<()>;
}

pub trait Deserialize {
    fn deserialize(reader: &mut impl BufRead) -> HoardResult<Self>
    where
        Self: Sized;

    fn deserialize_unbuffered(reader: impl Read) -> HoardResult<Self>
    where
        Self: Sized,
    {
        Self::deserialize(&mut BufReader::new(reader))
    }
}

/// deserialize trait where the size to read is required to be known
pub trait DeserializeSized {
    fn deserialize_sized(reader: &mut impl BufRead, size: u64) -> HoardResult<Self>
    where
        Self: Sized;

    fn deserialize_from_slice(slice: &[u8]) -> HoardResult<Self>
    where
        Self: Sized,
    {
        Self::deserialize_sized(&mut BufReader::new(slice), slice.len() as u64)
    }
}

impl<D: Deserialize> DeserializeSized for D {
    fn deserialize_sized(reader: &mut impl BufRead, _size: u64) -> HoardResult<Self>
    where
        Self: Sized,
    {
        Self::deserialize(reader)
    }
}
