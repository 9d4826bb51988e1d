use crate::error::HoardGenericError;
use crate::obj::WritableObject;
use crate::HoardResult;
use sha1::{Digest, Sha1};
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::Index;
use std::slice::SliceIndex;
use std::str::FromStr;

pub const OID_SIZE: usize = 20;

/// the stable 20-byte identifier of an immutable object
#[derive(PartialEq, Eq, Hash, Clone, Ord, PartialOrd, Copy)]
#[repr(transparent)]
pub struct Oid([u8; OID_SIZE]);

impl Oid {
    /// hash of an empty tree
    // 4b825dc642cb6eb9a060e54bf8d69288fbee4904
    pub const EMPTY_TREE: Self = Self([
        0x4b, 0x82, 0x5d, 0xc6, 0x42, 0xcb, 0x6e, 0xb9, 0xa0, 0x60, 0xe5, 0x4b, 0xf8, 0xd6, 0x92,
        0x88, 0xfb, 0xee, 0x49, 0x04,
    ]);
    /// this represents an unknown hash
    // sha1 returning zero is so incredibly unlikely even if it is possible
    pub const UNKNOWN: Self = Self([0; OID_SIZE]);

    #[inline]
    pub fn new(bytes: [u8; OID_SIZE]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; OID_SIZE] {
        &self.0
    }

    #[inline]
    pub fn is_unknown(self) -> bool {
        self == Self::UNKNOWN
    }

    #[inline]
    pub fn is_known(self) -> bool {
        self != Self::UNKNOWN
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn short(&self) -> String {
        self.to_hex()[0..7].to_owned()
    }

    /// splits the hex representation into the leading two digit directory and the rest
    pub fn split(&self) -> (String, String) {
        let hex = self.to_hex();
        (hex[0..2].to_owned(), hex[2..].to_owned())
    }
}

#[cfg(test)]
impl<'a> From<&'a str> for Oid {
    fn from(s: &'a str) -> Self {
        Self::from_str(s).unwrap()
    }
}

#[cfg(test)]
impl quickcheck::Arbitrary for Oid {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        let mut bytes = [0; OID_SIZE];
        for byte in &mut bytes {
            *byte = u8::arbitrary(g);
        }
        Self(bytes)
    }
}

impl FromStr for Oid {
    type Err = HoardGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end();
        ensure!(s.len() == 2 * OID_SIZE, "creating oid from invalid hex string (incorrect length)");
        let mut bytes = [0; OID_SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl AsRef<[u8]> for Oid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<I> Index<I> for Oid
where
    I: SliceIndex<[u8]>,
{
    type Output = I::Output;

    fn index(&self, index: I) -> &Self::Output {
        &self.0[index]
    }
}

impl Debug for Oid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for Oid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        if f.alternate() { write!(f, "{}", &hex[..7]) } else { write!(f, "{}", hex) }
    }
}

pub fn hash_bytes(bytes: impl AsRef<[u8]>) -> Oid {
    // sha1 keeps the object format compatible with git
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    Oid::new(hasher.finalize().into())
}

/// hash an object the way the object store would without writing it
pub fn hash_obj(obj: &dyn WritableObject) -> HoardResult<Oid> {
    Ok(hash_bytes(obj.serialize_with_headers()?))
}
