use crate::error::HoardResult;
use crate::obj::{ObjType, WritableObject};
use crate::serialize::{DeserializeSized, Serialize};
use std::io::{BufRead, Read, Write};

/// an opaque byte string
#[derive(PartialEq, Eq, Debug, Default, Clone)]
pub struct Blob {
    bytes: Vec<u8>,
}

impl Blob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Serialize for Blob {
    fn serialize(&self, writer: &mut dyn Write) -> HoardResult<()> {
        writer.write_all(&self.bytes)?;
        Ok(())
    }
}

impl DeserializeSized for Blob {
    fn deserialize_sized(reader: &mut impl BufRead, size: u64) -> HoardResult<Self> {
        let mut bytes = Vec::with_capacity(size as usize);
        reader.take(size).read_to_end(&mut bytes)?;
        ensure_eq!(bytes.len() as u64, size, "blob body shorter than its header size");
        Ok(Self { bytes })
    }
}

impl WritableObject for Blob {
    fn obj_ty(&self) -> ObjType {
        ObjType::Blob
    }
}
