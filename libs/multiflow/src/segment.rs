// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Immutable payload of a single write.

use std::fmt;
use std::io::Read;

use crate::error::{MultiflowError, Result};

/// One write's payload, exclusively owned by whoever holds it.
///
/// A segment moves writer → flow → reader and is dropped once consumed.
/// Its length is fixed at construction and is never zero.
#[derive(PartialEq, Eq)]
pub struct Segment {
    data: Box<[u8]>,
}

impl Segment {
    /// Copy caller bytes into a new segment.
    ///
    /// # Errors
    /// `InvalidRequest` for an empty payload or one longer than `max_len`,
    /// `ResourceExhausted` if the buffer cannot be allocated.
    pub fn copy_from_slice(bytes: &[u8], max_len: usize) -> Result<Self> {
        check_len(bytes.len(), max_len)?;
        let mut data = allocate(bytes.len())?;
        data.extend_from_slice(bytes);
        Ok(Self {
            data: data.into_boxed_slice(),
        })
    }

    /// Fill a new segment with exactly `len` bytes pulled from `reader`.
    ///
    /// # Errors
    /// Same length/allocation errors as [`Segment::copy_from_slice`], plus
    /// `TransferFault` if the reader fails or ends early. The partially
    /// filled buffer is dropped.
    pub fn read_from<R: Read>(reader: &mut R, len: usize, max_len: usize) -> Result<Self> {
        check_len(len, max_len)?;
        let mut data = allocate(len)?;
        data.resize(len, 0);
        reader.read_exact(&mut data).map_err(|e| {
            MultiflowError::TransferFault(format!("failed to copy {} bytes from caller: {}", len, e))
        })?;
        Ok(Self {
            data: data.into_boxed_slice(),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data.into_vec()
    }

    /// Printable copy for a write audit line, `None` when INFO is filtered out.
    pub(crate) fn audit_preview(&self) -> Option<String> {
        tracing::enabled!(tracing::Level::INFO).then(|| self.to_string())
    }
}

fn check_len(len: usize, max_len: usize) -> Result<()> {
    if len == 0 {
        return Err(MultiflowError::InvalidRequest(
            "segment payload is empty".to_string(),
        ));
    }
    if len > max_len {
        return Err(MultiflowError::InvalidRequest(format!(
            "segment of {} bytes exceeds the {} byte maximum",
            len, max_len
        )));
    }
    Ok(())
}

fn allocate(len: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|e| {
        MultiflowError::ResourceExhausted(format!("cannot allocate {} byte segment: {}", len, e))
    })?;
    Ok(data)
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment").field("len", &self.len()).finish()
    }
}

/// Printable form for audit logs.
impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.data).trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_copy_from_slice() {
        let segment = Segment::copy_from_slice(b"hello", 1024).unwrap();
        assert_eq!(segment.len(), 5);
        assert!(!segment.is_empty());
        assert_eq!(segment.as_bytes(), b"hello");
        assert_eq!(segment.into_vec(), b"hello".to_vec());
    }

    #[test]
    fn test_empty_payload_rejected() {
        let err = Segment::copy_from_slice(b"", 1024).unwrap_err();
        assert!(matches!(err, MultiflowError::InvalidRequest(_)));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = vec![b'x'; 17];
        let err = Segment::copy_from_slice(&payload, 16).unwrap_err();
        assert!(matches!(err, MultiflowError::InvalidRequest(_)));

        let exact = vec![b'x'; 16];
        assert_eq!(Segment::copy_from_slice(&exact, 16).unwrap().len(), 16);
    }

    #[test]
    fn test_read_from_reader() {
        let mut reader = Cursor::new(b"thread 7\nleftover".to_vec());
        let segment = Segment::read_from(&mut reader, 9, 1024).unwrap();
        assert_eq!(segment.as_bytes(), b"thread 7\n");
    }

    #[test]
    fn test_short_reader_is_transfer_fault() {
        let mut reader = Cursor::new(b"abc".to_vec());
        let err = Segment::read_from(&mut reader, 8, 1024).unwrap_err();
        assert!(matches!(err, MultiflowError::TransferFault(_)));
    }

    #[test]
    fn test_debug_hides_payload() {
        let segment = Segment::copy_from_slice(b"secret", 64).unwrap();
        assert_eq!(format!("{:?}", segment), "Segment { len: 6 }");
        assert_eq!(segment.to_string(), "secret");
    }

    #[test]
    fn test_audit_preview_follows_log_level() {
        let segment = Segment::copy_from_slice(b"thread 3\n", 64).unwrap();
        assert_eq!(segment.audit_preview(), None);

        let info = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(std::io::sink)
            .finish();
        tracing::subscriber::with_default(info, || {
            assert_eq!(segment.audit_preview().as_deref(), Some("thread 3"));
        });

        let warn = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(std::io::sink)
            .finish();
        tracing::subscriber::with_default(warn, || {
            assert_eq!(segment.audit_preview(), None);
        });
    }

    struct CloneCheck<'a, T>(&'a T);

    trait Cloneable {
        fn cloneable(&self) -> bool {
            true
        }
    }
    impl<T: Clone> Cloneable for CloneCheck<'_, T> {}

    trait NotCloneable {
        fn cloneable(&self) -> bool {
            false
        }
    }
    impl<T> NotCloneable for &CloneCheck<'_, T> {}

    #[test]
    fn test_segment_cannot_be_duplicated() {
        let segment = Segment::copy_from_slice(b"once", 64).unwrap();
        // Method lookup falls back to the autoref impl only when `T: Clone` fails.
        assert!(!(&CloneCheck(&segment)).cloneable());
        assert!((&CloneCheck(&b"once".to_vec())).cloneable());
    }
}
