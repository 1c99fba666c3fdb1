//! Strongly-typed identifiers.

use std::fmt;
use std::str::FromStr;

/// Monotonically increasing tick counter.
///
/// Incremented once per successful handshake with the simulator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TickId(pub u64);

impl TickId {
    /// The tick after this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Elapsed simulated seconds at `ticks_per_sec`.
    pub fn seconds(self, ticks_per_sec: u32) -> f64 {
        self.0 as f64 / f64::from(ticks_per_sec.max(1))
    }
}

impl fmt::Display for TickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TickId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Identifies a communication device (acoustic beacon or optical modem).
///
/// Beacons and modems are numbered independently; `DeviceId(0)` may
/// name both a beacon and a modem in the same environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DeviceId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Destination of a message: one device, or every other registered device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Recipient {
    /// A single device.
    Device(DeviceId),
    /// Every registered device except the sender.
    All,
}

impl From<DeviceId> for Recipient {
    fn from(id: DeviceId) -> Self {
        Self::Device(id)
    }
}

impl From<i64> for Recipient {
    /// `-1` (or any negative id) broadcasts.
    fn from(v: i64) -> Self {
        match u32::try_from(v) {
            Ok(id) => Self::Device(DeviceId(id)),
            Err(_) => Self::All,
        }
    }
}

impl FromStr for Recipient {
    type Err = std::num::ParseIntError;

    /// Accepts `"all"` (any case), `"-1"`, or a device number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        let v: i64 = s.trim().parse()?;
        Ok(Self::from(v))
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(id) => write!(f, "{id}"),
            Self::All => write!(f, "all"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_seconds_uses_rate() {
        assert_eq!(TickId(45).seconds(30), 1.5);
        assert_eq!(TickId(0).seconds(30), 0.0);
    }

    #[test]
    fn negative_recipient_is_broadcast() {
        assert_eq!(Recipient::from(-1), Recipient::All);
        assert_eq!(Recipient::from(3), Recipient::Device(DeviceId(3)));
    }

    #[test]
    fn recipient_parses_all_and_numbers() {
        assert_eq!("all".parse::<Recipient>().unwrap(), Recipient::All);
        assert_eq!("ALL".parse::<Recipient>().unwrap(), Recipient::All);
        assert_eq!("-1".parse::<Recipient>().unwrap(), Recipient::All);
        assert_eq!(
            "7".parse::<Recipient>().unwrap(),
            Recipient::Device(DeviceId(7))
        );
        assert!("seven".parse::<Recipient>().is_err());
    }
}
