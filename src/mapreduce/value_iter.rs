// SPDX-License-Identifier: GPL-3.0-or-later

//! The reducer-facing value iterator (spec §4.8 "Value iterator
//! (reducer-facing)"): lazily decodes a sequence of varint-length-prefixed
//! concatenated blobs — one per contributing temp store — without copying
//! more than one value at a time. Single-pass, non-restartable, matching
//! the spec's "next(&size) returns a borrowed pointer... or NULL at end"
//! contract, expressed in Rust as `Iterator<Item = Vec<u8>>`.

pub struct ValueIterator {
    blobs: Vec<Vec<u8>>,
    blob_idx: usize,
    offset: usize,
}

impl ValueIterator {
    pub fn new(blobs: Vec<Vec<u8>>) -> Self {
        ValueIterator { blobs, blob_idx: 0, offset: 0 }
    }
}

impl Iterator for ValueIterator {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            let blob = self.blobs.get(self.blob_idx)?;
            if self.offset >= blob.len() {
                self.blob_idx += 1;
                self.offset = 0;
                continue;
            }
            let (len, consumed) = crate::varint::decode(&blob[self.offset..])?;
            let start = self.offset + consumed;
            let end = start + len as usize;
            let value = blob.get(start..end)?.to_vec();
            self.offset = end;
            return Some(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varint;

    fn blob(values: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for v in values {
            varint::encode(v.len() as u64, &mut out);
            out.extend_from_slice(v);
        }
        out
    }

    #[test]
    fn iterates_values_within_one_blob() {
        let iter = ValueIterator::new(vec![blob(&[b"a", b"bc", b"def"])]);
        let values: Vec<Vec<u8>> = iter.collect();
        assert_eq!(values, vec![b"a".to_vec(), b"bc".to_vec(), b"def".to_vec()]);
    }

    #[test]
    fn iterates_across_multiple_blobs_in_order() {
        let iter = ValueIterator::new(vec![blob(&[b"x"]), blob(&[b"y", b"z"])]);
        let values: Vec<Vec<u8>> = iter.collect();
        assert_eq!(values, vec![b"x".to_vec(), b"y".to_vec(), b"z".to_vec()]);
    }

    #[test]
    fn empty_blob_list_yields_nothing() {
        assert_eq!(ValueIterator::new(Vec::new()).count(), 0);
    }
}
