// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

//! IPv4 and IPv6 address types.

use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

cfg_if! {
    if #[cfg(all(not(feature = "std"), not(test)))] {
        use alloc::string::String;
    } else {
        use std::string::String;
    }
}

/// IANA protocol numbers the engine needs to recognize.
pub const IPPROTO_ICMPV6: u8 = 58;
pub const IPPROTO_SCTP: u8 = 132;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// An IPv4 address.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Ipv4Addr {
    inner: [u8; 4],
}

impl Ipv4Addr {
    pub const ANY: Self = Self { inner: [0; 4] };

    /// Return the address as network-order bytes.
    pub fn bytes(&self) -> [u8; 4] {
        self.inner
    }
}

impl From<[u8; 4]> for Ipv4Addr {
    fn from(bytes: [u8; 4]) -> Self {
        Self { inner: bytes }
    }
}

impl From<u32> for Ipv4Addr {
    fn from(val: u32) -> Self {
        Self { inner: val.to_be_bytes() }
    }
}

impl From<Ipv4Addr> for u32 {
    fn from(ip: Ipv4Addr) -> u32 {
        u32::from_be_bytes(ip.inner)
    }
}

impl From<smoltcp::wire::Ipv4Address> for Ipv4Addr {
    fn from(smolip4: smoltcp::wire::Ipv4Address) -> Self {
        let bytes = smolip4.as_bytes();
        Self::from([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl From<Ipv4Addr> for smoltcp::wire::Ipv4Address {
    fn from(ip: Ipv4Addr) -> Self {
        Self::from_bytes(&ip.bytes())
    }
}

impl FromStr for Ipv4Addr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut inner = [0u8; 4];
        let mut octets = s.split('.');

        for byte in inner.iter_mut() {
            let octet =
                octets.next().ok_or_else(|| format!("malformed ip: {}", s))?;
            *byte =
                octet.parse().map_err(|_| format!("bad octet: {}", octet))?;
        }

        if octets.next().is_some() {
            return Err(format!("malformed ip: {}", s));
        }

        Ok(Self { inner })
    }
}

impl Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.inner[0], self.inner[1], self.inner[2], self.inner[3]
        )
    }
}

impl Debug for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Ipv4Addr {{ {} }}", self)
    }
}

/// An IPv6 address.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Ipv6Addr {
    inner: [u8; 16],
}

impl Ipv6Addr {
    pub const ANY: Self = Self { inner: [0; 16] };

    /// Return the address as network-order bytes.
    pub fn bytes(&self) -> [u8; 16] {
        self.inner
    }
}

impl From<[u8; 16]> for Ipv6Addr {
    fn from(bytes: [u8; 16]) -> Self {
        Self { inner: bytes }
    }
}

impl From<[u16; 8]> for Ipv6Addr {
    fn from(groups: [u16; 8]) -> Self {
        let mut bytes = [0u8; 16];
        for (i, g) in groups.iter().enumerate() {
            let b = g.to_be_bytes();
            bytes[i * 2] = b[0];
            bytes[i * 2 + 1] = b[1];
        }
        Self { inner: bytes }
    }
}

impl From<smoltcp::wire::Ipv6Address> for Ipv6Addr {
    fn from(smolip6: smoltcp::wire::Ipv6Address) -> Self {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(smolip6.as_bytes());
        Self { inner: bytes }
    }
}

impl From<Ipv6Addr> for smoltcp::wire::Ipv6Address {
    fn from(ip: Ipv6Addr) -> Self {
        Self::from_bytes(&ip.bytes())
    }
}

impl Display for Ipv6Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, chunk) in self.inner.chunks(2).enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:x}", u16::from_be_bytes([chunk[0], chunk[1]]))?;
        }
        Ok(())
    }
}

impl Debug for Ipv6Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Ipv6Addr {{ {} }}", self)
    }
}
