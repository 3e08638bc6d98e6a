//! DNS-SD TXT records: an ordered key/value bag with the daemon's
//! length-prefixed wire encoding.
//!
//! Wire format: a sequence of entries, each a length byte followed by
//! `key=value` (or a bare `key` for value-less entries). Every entry's
//! encoded length fits in its length byte, so key + `=` + value is at
//! most 255 bytes.

use crate::error::DiscoveryError;
use crate::types::{MAX_TXT_KEY_LEN, MAX_TXT_RECORD_LEN, MAX_TXT_VALUE_LEN, TxtItem};

/// A service's TXT properties.
///
/// Records built locally are mutable; records parsed from a daemon
/// reply via [`TxtRecord::from_wire`] are read-only and reject mutation
/// with `InvalidArgument` (never a panic). Cloning any record yields an
/// independent mutable one.
#[derive(Debug, Default)]
pub struct TxtRecord {
    items: Vec<TxtItem>,
    read_only: bool,
}

impl TxtRecord {
    /// Creates an empty mutable record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a wire-format buffer into a read-only record.
    ///
    /// The bytes are copied up front: daemon reply buffers are only
    /// valid for the duration of the callback, so the record never
    /// borrows them.
    pub fn from_wire(bytes: &[u8]) -> Self {
        Self {
            items: parse_wire(bytes),
            read_only: true,
        }
    }

    /// Parses a wire-format buffer into a mutable owned record.
    pub fn copied_from_wire(bytes: &[u8]) -> Self {
        Self {
            items: parse_wire(bytes),
            read_only: false,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.key == key)
            .map(|item| item.value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.items.iter().any(|item| item.key == key)
    }

    /// Returns the entry at `index` in insertion order.
    pub fn item_at(&self, index: usize) -> Result<&TxtItem, DiscoveryError> {
        self.items.get(index).ok_or(DiscoveryError::OutOfRange {
            index,
            len: self.items.len(),
        })
    }

    /// Sets `key` to `value`, replacing an existing entry in place.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), DiscoveryError> {
        self.check_mutable()?;
        if key.is_empty() {
            return Err(DiscoveryError::InvalidArgument("TXT key is empty".into()));
        }
        if key.len() > MAX_TXT_KEY_LEN {
            return Err(DiscoveryError::InvalidArgument(format!(
                "TXT key {key:?} exceeds {MAX_TXT_KEY_LEN} bytes"
            )));
        }
        if value.len() > MAX_TXT_VALUE_LEN {
            return Err(DiscoveryError::InvalidArgument(format!(
                "TXT value for {key:?} exceeds {MAX_TXT_VALUE_LEN} bytes"
            )));
        }
        if key.len() + 1 + value.len() > u8::MAX as usize {
            return Err(DiscoveryError::InvalidArgument(format!(
                "TXT entry for {key:?} exceeds 255 encoded bytes"
            )));
        }
        let others: usize = self
            .items
            .iter()
            .filter(|item| item.key != key)
            .map(entry_len)
            .sum();
        if others + 1 + key.len() + 1 + value.len() > MAX_TXT_RECORD_LEN {
            return Err(DiscoveryError::InvalidArgument(format!(
                "TXT record would exceed {MAX_TXT_RECORD_LEN} encoded bytes"
            )));
        }

        match self.items.iter_mut().find(|item| item.key == key) {
            Some(item) => item.value = value.into(),
            None => self.items.push(TxtItem::new(key, value)),
        }
        Ok(())
    }

    /// Removes `key`; absent keys are a no-op.
    pub fn remove(&mut self, key: &str) -> Result<(), DiscoveryError> {
        self.check_mutable()?;
        self.items.retain(|item| item.key != key);
        Ok(())
    }

    /// Removes all entries.
    pub fn clear(&mut self) -> Result<(), DiscoveryError> {
        self.check_mutable()?;
        self.items.clear();
        Ok(())
    }

    /// Length of the wire-format serialization in bytes.
    ///
    /// `set` and `parse_wire` bound the total at [`MAX_TXT_RECORD_LEN`],
    /// so the narrowing cast cannot truncate.
    pub fn wire_len(&self) -> u16 {
        self.items.iter().map(entry_len).sum::<usize>() as u16
    }

    /// Serializes to the daemon's wire format for register/resolve.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len() as usize);
        for item in &self.items {
            out.push((item.key.len() + 1 + item.value.len()) as u8);
            out.extend_from_slice(item.key.as_bytes());
            out.push(b'=');
            out.extend_from_slice(item.value.as_bytes());
        }
        out
    }

    fn check_mutable(&self) -> Result<(), DiscoveryError> {
        if self.read_only {
            return Err(DiscoveryError::InvalidArgument(
                "record is read-only (parsed from a daemon reply)".into(),
            ));
        }
        Ok(())
    }
}

impl Clone for TxtRecord {
    /// Cloning always yields a mutable record, even from a read-only
    /// one: the copy owns fresh storage and is never an alias.
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            read_only: false,
        }
    }
}

/// Bytes one entry occupies when re-encoded (value-less entries gain
/// an `=` on the way back out).
fn entry_len(item: &TxtItem) -> usize {
    1 + item.key.len() + 1 + item.value.len()
}

fn parse_wire(bytes: &[u8]) -> Vec<TxtItem> {
    let mut items = Vec::new();
    let mut encoded = 0;
    let mut pos = 0;
    while pos < bytes.len() {
        let len = bytes[pos] as usize;
        pos += 1;
        if len == 0 {
            continue;
        }
        // Tolerate a truncated final entry.
        let end = (pos + len).min(bytes.len());
        let entry = &bytes[pos..end];
        pos = end;

        let (key, value) = match entry.iter().position(|&b| b == b'=') {
            Some(eq) => (&entry[..eq], &entry[eq + 1..]),
            // Value-less entry: bare key, empty value.
            None => (entry, &entry[entry.len()..]),
        };
        if key.is_empty() {
            continue;
        }
        let item = TxtItem {
            key: String::from_utf8_lossy(key).into_owned(),
            value: String::from_utf8_lossy(value).into_owned(),
        };
        // Stop once re-encoding would exceed the rdata limit; anything
        // past it could not have come from a valid record.
        encoded += entry_len(&item);
        if encoded > MAX_TXT_RECORD_LEN {
            break;
        }
        items.push(item);
    }
    items
}
