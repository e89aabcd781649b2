// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2022 Oxide Computer Company

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

/// A MAC address.
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
pub struct MacAddr {
    inner: [u8; 6],
}

impl MacAddr {
    pub const BROADCAST: Self = Self { inner: [0xFF; 6] };
    pub const ZERO: Self = Self { inner: [0x00; 6] };

    /// The six bytes of the address, in wire order.
    pub fn bytes(&self) -> [u8; 6] {
        self.inner
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self { inner: bytes }
    }
}

impl From<&[u8; 6]> for MacAddr {
    fn from(bytes: &[u8; 6]) -> Self {
        Self { inner: *bytes }
    }
}

impl From<MacAddr> for smoltcp::wire::EthernetAddress {
    fn from(addr: MacAddr) -> Self {
        Self(addr.bytes())
    }
}

impl From<smoltcp::wire::EthernetAddress> for MacAddr {
    fn from(addr: smoltcp::wire::EthernetAddress) -> Self {
        Self { inner: addr.0 }
    }
}

impl AsRef<[u8]> for MacAddr {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut inner = [0u8; 6];
        let mut groups = s.split(':');

        for byte in inner.iter_mut() {
            let group =
                groups.next().ok_or_else(|| format!("too short: {}", s))?;
            *byte = u8::from_str_radix(group, 16)
                .map_err(|_| format!("not a hex octet: {}", group))?;
        }

        if groups.next().is_some() {
            return Err(format!("too long: {}", s));
        }

        Ok(MacAddr { inner })
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d, e, g] = self.inner;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", a, b, c, d, e, g)
    }
}

// The default Debug is very noisy and mostly gets in the way, e.g.
// `MacAddr { inner: [168, 64, 37, 255, 255, 255] }`.
impl Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MacAddr {{ {} }}", self)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn good_mac() {
        let mac = "A8:40:25:00:77:01".parse::<MacAddr>().unwrap();
        assert_eq!(mac.bytes(), [0xA8, 0x40, 0x25, 0x00, 0x77, 0x01]);
        assert_eq!(format!("{}", mac), "A8:40:25:00:77:01");
    }

    #[test]
    fn bad_mac() {
        assert!("A8:40:25:00:77".parse::<MacAddr>().is_err());
        assert!("A8:40:25:00:77:00:11".parse::<MacAddr>().is_err());
        assert!("A8:40:25:00:77:ZZ".parse::<MacAddr>().is_err());
    }
}
