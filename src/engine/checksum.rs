// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! Ones-complement checksums and incremental update primitives.
//!
//! Header editors never recompute a transport checksum from scratch.
//! Every rewrite goes through the replace primitives here, which
//! fold the difference between old and new bytes into the stored
//! value, and into the running receive sum when the packet carries
//! one.

use super::packet::CsumMode;

/// A checksum as a header stores it on the wire: the complemented,
/// folded sum.
///
/// Kept distinct from [`Checksum`] so the complemented and
/// uncomplemented forms cannot be mixed up at a call site.
pub struct HeaderChecksum {
    inner: [u8; 2],
}

impl HeaderChecksum {
    /// The stored wire bytes.
    pub fn bytes(&self) -> [u8; 2] {
        self.inner
    }

    /// Treat two bytes read out of a header as a stored checksum.
    pub fn wrap(hc: [u8; 2]) -> Self {
        Self { inner: hc }
    }
}

impl From<Checksum> for HeaderChecksum {
    fn from(csum: Checksum) -> HeaderChecksum {
        Self { inner: (!csum.fold()).to_ne_bytes() }
    }
}

/// A one's complement sum accumulator.
///
/// The accumulator is kept as a `u32`; carries are only folded back
/// into the low 16 bits on demand.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
}

impl Checksum {
    pub fn compute(bytes: &[u8]) -> Self {
        let mut csum = Checksum::default();
        csum.add(bytes);
        csum
    }

    pub fn add(&mut self, bytes: &[u8]) {
        self.inner = accumulate(self.inner, bytes, |word| word);
    }

    /// Remove `bytes` from the sum. In one's complement arithmetic,
    /// subtracting a word is adding its complement.
    pub fn sub(&mut self, bytes: &[u8]) {
        self.inner = accumulate(self.inner, bytes, |word| !word);
    }

    /// Fold the accumulated carries back into a 16-bit value.
    ///
    /// Two rounds always suffice for a `u32` accumulator: the first
    /// leaves at most one bit of carry, the second absorbs it.
    pub fn fold(&self) -> u16 {
        let mut sum = self.inner;
        sum = (sum & 0xFFFF) + (sum >> 16);
        sum = (sum & 0xFFFF) + (sum >> 16);
        sum as u16
    }

    /// Reflect a header field change `old` -> `new` into a running
    /// receive sum.
    ///
    /// The dance is complement, subtract, add, complement; the same
    /// adjustment hardware-assisted receive paths expect when a
    /// checksummed field is rewritten after the sum was taken.
    pub fn rewrite_field(&mut self, old: &[u8], new: &[u8]) {
        let mut tmp = Checksum::from((!self.fold()) as u32);
        tmp.sub(old);
        tmp.add(new);
        self.inner = (!tmp.fold()) as u32;
    }
}

impl From<HeaderChecksum> for Checksum {
    fn from(hc: HeaderChecksum) -> Self {
        Self { inner: (!u16::from_ne_bytes(hc.bytes())) as u32 }
    }
}

impl From<u32> for Checksum {
    fn from(csum: u32) -> Self {
        Self { inner: csum }
    }
}

/// Sum `bytes` as 16-bit words into `sum`, passing each word through
/// `xfrm` first (identity for addition, complement for subtraction).
/// A trailing odd byte counts as the low half of a final word.
fn accumulate(mut sum: u32, bytes: &[u8], xfrm: fn(u16) -> u16) -> u32 {
    let mut words = bytes.chunks_exact(2);

    for pair in words.by_ref() {
        sum += xfrm(u16::from_ne_bytes([pair[0], pair[1]])) as u32;
    }

    if let Some(&odd) = words.remainder().first() {
        sum += xfrm(odd as u16) as u32;
    }

    sum
}

/// Incrementally update a header checksum for a field change.
///
/// `check` is the stored (complemented) checksum; `old` and `new`
/// are the field's bytes before and after. Used for checksums with
/// no offload interaction, i.e. the IPv4 header checksum.
pub fn csum_replace(check: [u8; 2], old: &[u8], new: &[u8]) -> [u8; 2] {
    let mut csum = Checksum::from(HeaderChecksum::wrap(check));
    csum.sub(old);
    csum.add(new);
    HeaderChecksum::from(csum).bytes()
}

/// [`csum_replace`] for a 2-byte field.
pub fn csum_replace2(check: [u8; 2], old: [u8; 2], new: [u8; 2]) -> [u8; 2] {
    csum_replace(check, &old, &new)
}

/// [`csum_replace`] for a 4-byte field.
pub fn csum_replace4(check: [u8; 2], old: [u8; 4], new: [u8; 4]) -> [u8; 2] {
    csum_replace(check, &old, &new)
}

/// Incrementally update a transport checksum for a field change,
/// honoring the packet's checksum mode.
///
/// In `Partial` mode the stored value is the pseudo-header sum the
/// hardware will finish; only pseudo-header field changes touch it.
/// In `Complete` mode the running receive sum is additionally
/// adjusted for pseudo-header changes, since the transport checksum
/// field itself compensates for covered data. Returns the new stored
/// bytes.
pub fn proto_csum_replace(
    check: [u8; 2],
    mode: &mut CsumMode,
    old: &[u8],
    new: &[u8],
    pseudohdr: bool,
) -> [u8; 2] {
    match mode {
        CsumMode::Partial => {
            if pseudohdr {
                csum_replace(check, old, new)
            } else {
                check
            }
        }

        other => {
            let updated = csum_replace(check, old, new);
            if pseudohdr {
                if let CsumMode::Complete(csum) = other {
                    csum.rewrite_field(old, new);
                }
            }
            updated
        }
    }
}

/// [`proto_csum_replace`] for a 2-byte field (ports).
pub fn proto_csum_replace2(
    check: [u8; 2],
    mode: &mut CsumMode,
    old: [u8; 2],
    new: [u8; 2],
    pseudohdr: bool,
) -> [u8; 2] {
    proto_csum_replace(check, mode, &old, &new, pseudohdr)
}

/// [`proto_csum_replace`] for a 4-byte field (IPv4 addresses).
pub fn proto_csum_replace4(
    check: [u8; 2],
    mode: &mut CsumMode,
    old: [u8; 4],
    new: [u8; 4],
    pseudohdr: bool,
) -> [u8; 2] {
    proto_csum_replace(check, mode, &old, &new, pseudohdr)
}

/// [`proto_csum_replace`] for a 16-byte field (IPv6 addresses).
pub fn proto_csum_replace16(
    check: [u8; 2],
    mode: &mut CsumMode,
    old: [u8; 16],
    new: [u8; 16],
    pseudohdr: bool,
) -> [u8; 2] {
    proto_csum_replace(check, mode, &old, &new, pseudohdr)
}
