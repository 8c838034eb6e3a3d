//! A cheaply cloneable, immutable UTF-8 string backed by [`Bytes`].
use bytes::Bytes;
use std::{fmt, ops::Deref, str::Utf8Error};

/// An immutable string sharing storage with a [`Bytes`] buffer.
///
/// Cloning is a refcount bump, and [`ByteStr::slice_ref`] can carve out a
/// substring without reallocating — used throughout connection setup where a
/// `host:port/keyspace`-shaped configuration string is parsed in place.
#[derive(Clone, Eq)]
pub struct ByteStr(Bytes);

impl ByteStr {
    /// Build from an owned [`String`] with no further validation needed.
    pub fn copy_from_str(s: impl AsRef<str>) -> Self {
        Self(Bytes::copy_from_slice(s.as_ref().as_bytes()))
    }

    /// Build from a `'static` string without copying.
    pub fn from_static(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }

    /// Validate and wrap an owned [`Bytes`] buffer.
    pub fn from_utf8(bytes: Bytes) -> Result<Self, Utf8Error> {
        std::str::from_utf8(&bytes)?;
        Ok(Self(bytes))
    }

    /// Carve a substring of `self` that shares the same backing storage.
    ///
    /// `subset` must be a slice of `self.as_str()`.
    pub fn slice_ref(&self, subset: &str) -> Self {
        Self(self.0.slice_ref(subset.as_bytes()))
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        // SAFETY: construction always goes through UTF-8 validation.
        unsafe { std::str::from_utf8_unchecked(&self.0) }
    }
}

impl Deref for ByteStr {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for ByteStr {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<&str> for ByteStr {
    fn from(s: &str) -> Self {
        Self::copy_from_str(s)
    }
}

impl From<String> for ByteStr {
    fn from(s: String) -> Self {
        Self(Bytes::from(s.into_bytes()))
    }
}

impl PartialEq for ByteStr {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl PartialEq<str> for ByteStr {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for ByteStr {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl std::hash::Hash for ByteStr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

impl fmt::Display for ByteStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ByteStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}
