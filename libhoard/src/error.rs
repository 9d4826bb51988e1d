use crate::hash::Oid;
use crate::obj::ObjType;
use std::fmt::{self, Display, Formatter};

pub type HoardResult<T> = Result<T, HoardGenericError>;
pub type HoardGenericError = anyhow::Error;

// usually we can just use anyhow for errors, but sometimes its nice to have a "rust"
// representation we can test or match against
#[derive(Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub enum HoardError {
    /// object `{0}` not found in the object store (nor on any remote when routed)
    ObjectNotFound(Oid),
    /// a path component does not exist
    NoChild(String),
    /// a mid-path component is not a directory
    NotDirectory(String),
    /// the box has no record at all
    NoRecord(String),
    /// attempted to move a box head to one of its ancestors
    CannotGoBackInTime,
    /// the two records have no common ancestor
    UnrelatedHistories,
    /// the box is pinned on a past record and rejects writes
    ReadOnly,
    /// an object could not be retrieved from any remote
    FetchError(Oid),
    /// pushing ref updates to a peer failed; `(ref, reason)` per failed ref
    UpdateRefsError(Vec<(String, String)>),
    /// expected an object of a different type
    BadObjectType(Oid, ObjType),
}

pub trait HoardErrorExt {
    fn try_into_hoard_error(self) -> HoardResult<HoardError>;
    fn try_into_obj_not_found_err(self) -> HoardResult<Oid>;
}

impl HoardErrorExt for HoardGenericError {
    fn try_into_hoard_error(self) -> HoardResult<HoardError> {
        match self.downcast::<HoardError>() {
            Ok(err) => Ok(err),
            Err(cast_failed_err) => Err(cast_failed_err),
        }
    }

    fn try_into_obj_not_found_err(self) -> HoardResult<Oid> {
        match self.try_into_hoard_error()? {
            HoardError::ObjectNotFound(oid) => Ok(oid),
            err => Err(anyhow!(err)),
        }
    }
}

pub trait HoardResultExt {
    fn is_not_found_err(&self) -> bool;
    fn is_lookup_err(&self) -> bool;
    fn is_fatal(&self) -> bool;
}

macro_rules! error_ext_is_method {
    ($method:ident) => {
        fn $method(&self) -> bool {
            match self {
                Ok(..) => false,
                Err(err) => err.$method(),
            }
        }
    };
}

impl<T> HoardResultExt for HoardResult<T> {
    error_ext_is_method!(is_not_found_err);

    error_ext_is_method!(is_lookup_err);

    error_ext_is_method!(is_fatal);
}

impl HoardResultExt for HoardGenericError {
    fn is_not_found_err(&self) -> bool {
        matches!(self.downcast_ref::<HoardError>(), Some(HoardError::ObjectNotFound(..)))
    }

    /// errors that a path resolution is allowed to produce on valid input
    fn is_lookup_err(&self) -> bool {
        matches!(
            self.downcast_ref::<HoardError>(),
            Some(HoardError::NoChild(..) | HoardError::NotDirectory(..))
        )
    }

    fn is_fatal(&self) -> bool {
        match self.downcast_ref::<HoardError>() {
            Some(err) => !matches!(
                err,
                HoardError::ObjectNotFound(..)
                    | HoardError::NoChild(..)
                    | HoardError::NotDirectory(..)
                    | HoardError::CannotGoBackInTime
                    | HoardError::UnrelatedHistories
                    | HoardError::FetchError(..)
            ),
            None => true,
        }
    }
}

impl std::error::Error for HoardError {
}

impl Display for HoardError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            HoardError::ObjectNotFound(oid) => write!(f, "object `{}` not found", oid),
            HoardError::NoChild(name) => write!(f, "no such child `{}`", name),
            HoardError::NotDirectory(name) => write!(f, "`{}` is not a directory", name),
            HoardError::NoRecord(name) => write!(f, "box `{}` has no record", name),
            HoardError::CannotGoBackInTime =>
                write!(f, "refusing to move a box head back to one of its ancestors"),
            HoardError::UnrelatedHistories =>
                write!(f, "records have no common ancestor"),
            HoardError::ReadOnly => write!(f, "box is read-only"),
            HoardError::FetchError(oid) =>
                write!(f, "failed to fetch object `{}` from any remote", oid),
            HoardError::UpdateRefsError(failures) => {
                writeln!(f, "failed to update refs on peer:")?;
                for (name, reason) in failures {
                    writeln!(f, "  {}: {}", name, reason)?;
                }
                Ok(())
            }
            HoardError::BadObjectType(oid, ty) =>
                write!(f, "object `{}` has unexpected type `{}`", oid, ty),
        }
    }
}
