//! Node addressing.
//!
//! The node reads its CANopen node-ID from seven address pins wired to a
//! DIP switch. A pin that reads high sets the corresponding bit.

use std::fmt;

use crate::error::{Error, Result};

/// Number of address pins.
pub const ADDRESS_PINS: usize = 7;

/// Mask of the DIP bits used as the short (4-bit) node address.
pub const SHORT_ADDRESS_MASK: u8 = 0x0F;

/// A valid CANopen node-ID (1..=127).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(u8);

impl NodeId {
    /// Lowest valid node-ID.
    pub const MIN: u8 = 1;
    /// Highest valid node-ID.
    pub const MAX: u8 = 127;

    /// Decode the node-ID from the address pin levels (`true` = high).
    pub fn from_dip_switches(pins: [bool; ADDRESS_PINS]) -> Result<Self> {
        Self::try_from(switch_mask(pins))
    }

    /// Raw node-ID value.
    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for NodeId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::Config(format!(
                "node-ID {value} out of range {}..={}",
                Self::MIN,
                Self::MAX
            )))
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bit mask of the address pins; pin `i` high sets bit `i`.
pub fn switch_mask(pins: [bool; ADDRESS_PINS]) -> u8 {
    pins.iter()
        .enumerate()
        .filter(|(_, high)| **high)
        .fold(0u8, |mask, (bit, _)| mask | (1 << bit))
}

/// Short node address from the low four switch bits.
pub fn short_address(options: u8) -> u8 {
    options & SHORT_ADDRESS_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_low_pins_is_invalid() {
        assert_eq!(switch_mask([false; ADDRESS_PINS]), 0);
        assert!(NodeId::from_dip_switches([false; ADDRESS_PINS]).is_err());
    }

    #[test]
    fn test_high_pins_set_their_bits() {
        // Pins 0, 1, 2 and 4 high: 1 + 2 + 4 + 16 = 23.
        let pins = [true, true, true, false, true, false, false];
        assert_eq!(switch_mask(pins), 0b001_0111);
        let id = NodeId::from_dip_switches(pins).unwrap();
        assert_eq!(id.get(), 23);
        assert_eq!(id.to_string(), "23");
    }

    #[test]
    fn test_all_high_is_max_id() {
        assert_eq!(switch_mask([true; ADDRESS_PINS]), 0x7F);
        let id = NodeId::from_dip_switches([true; ADDRESS_PINS]).unwrap();
        assert_eq!(id.get(), NodeId::MAX);
    }

    #[test]
    fn test_single_high_pin() {
        let mut pins = [false; ADDRESS_PINS];
        pins[6] = true;
        assert_eq!(switch_mask(pins), 64);
        assert_eq!(short_address(switch_mask(pins)), 0);
    }

    #[test]
    fn test_node_id_range() {
        assert!(NodeId::try_from(0).is_err());
        assert!(NodeId::try_from(1).is_ok());
        assert!(NodeId::try_from(127).is_ok());
        assert!(NodeId::try_from(128).is_err());
    }

    #[test]
    fn test_short_address_masks_low_nibble() {
        assert_eq!(short_address(0b0101_1011), 0b1011);
    }
}
