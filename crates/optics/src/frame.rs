//! Per-frame channel codes and the timeslot layout that sizes them.

use platform::config::{CHANNEL_COUNT, TIMESLOT_COUNT};

use crate::expression::ChannelSource;

/// Error returned when a frame cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Fewer bytes than [`TimeslotLayout::frame_bytes`].
    Short {
        /// Bytes the layout requires.
        needed: u16,
        /// Bytes supplied.
        got: u16,
    },
}

/// Which timeslots are running, how many channels each carries and how
/// wide each channel's code is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimeslotLayout {
    active_slots: u8,
    dual_mask: u16,
    data_sizes: [u8; TIMESLOT_COUNT],
}

impl TimeslotLayout {
    /// Build a layout. `active_slots` is clamped to 1..=12 and data sizes to 0..=4.
    pub fn new(active_slots: u8, dual_mask: u16, data_sizes: [u8; TIMESLOT_COUNT]) -> Self {
        Self {
            active_slots: active_slots.clamp(1, TIMESLOT_COUNT as u8),
            dual_mask: dual_mask & 0x0FFF,
            data_sizes: data_sizes.map(|s| s.min(4)),
        }
    }

    /// Same data size for every active slot.
    pub fn uniform(active_slots: u8, dual_mask: u16, data_size: u8) -> Self {
        Self::new(active_slots, dual_mask, [data_size; TIMESLOT_COUNT])
    }

    /// Number of enabled timeslots.
    pub fn active_slots(&self) -> u8 {
        self.active_slots
    }

    /// Bit `n` set when timeslot `n` delivers two channels.
    pub fn dual_mask(&self) -> u16 {
        self.dual_mask
    }

    /// Whether `slot` delivers two channels.
    pub fn is_dual(&self, slot: u8) -> bool {
        self.dual_mask
            .checked_shr(u32::from(slot))
            .is_some_and(|bits| bits & 1 != 0)
    }

    /// Code width of `slot` in bytes.
    pub fn data_size(&self, slot: u8) -> u8 {
        self.data_sizes.get(usize::from(slot)).copied().unwrap_or(0)
    }

    /// Bytes that must be queued before one whole frame can be read.
    pub fn frame_bytes(&self) -> usize {
        (0..self.active_slots)
            .map(|slot| {
                let channels = if self.is_dual(slot) { 2 } else { 1 };
                usize::from(self.data_size(slot)).saturating_mul(channels)
            })
            .fold(0usize, usize::saturating_add)
    }

    /// Channel indices present in a frame, in FIFO order.
    pub fn channels(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.active_slots).flat_map(move |slot| {
            let first = slot.saturating_mul(2);
            let second = if self.is_dual(slot) { Some(first.saturating_add(1)) } else { None };
            core::iter::once(first).chain(second)
        })
    }
}

/// Raw codes of one frame, indexed by channel id (`A1` = 0 … `L2` = 23).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelFrame {
    codes: [u32; CHANNEL_COUNT],
}

impl ChannelFrame {
    /// Frame with the given codes.
    pub const fn from_codes(codes: [u32; CHANNEL_COUNT]) -> Self {
        Self { codes }
    }

    /// Unpack FIFO bytes (big-endian per code) laid out by `layout`.
    #[allow(clippy::arithmetic_side_effects)] // Safety: codes are at most 4 bytes, shifting by 8 stays inside u32
    pub fn decode(layout: &TimeslotLayout, bytes: &[u8]) -> Result<Self, FrameError> {
        let needed = layout.frame_bytes();
        if bytes.len() < needed {
            return Err(FrameError::Short {
                needed: u16::try_from(needed).unwrap_or(u16::MAX),
                got: u16::try_from(bytes.len()).unwrap_or(u16::MAX),
            });
        }

        let mut codes = [0u32; CHANNEL_COUNT];
        let mut pos = 0usize;
        for channel in layout.channels() {
            let size = usize::from(layout.data_size(channel / 2));
            let end = pos.saturating_add(size);
            let code = bytes
                .get(pos..end)
                .unwrap_or_default()
                .iter()
                .fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
            if let Some(slot) = codes.get_mut(usize::from(channel)) {
                *slot = code;
            }
            pos = end;
        }
        Ok(Self { codes })
    }

    /// Raw code of `channel`.
    pub fn code(&self, channel: u8) -> u32 {
        self.codes.get(usize::from(channel)).copied().unwrap_or(0)
    }
}

impl ChannelSource for ChannelFrame {
    #[allow(clippy::cast_precision_loss)] // codes are at most 32 bits, f32 keeps 24
    fn channel(&self, index: u8) -> f32 {
        self.code(index) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bytes_counts_dual_slots_twice() {
        let board = TimeslotLayout::uniform(4, 0xF, 4);
        assert_eq!(board.frame_bytes(), 32);
        let mixed = TimeslotLayout::new(3, 0b010, [2, 3, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(mixed.frame_bytes(), 2 + 6 + 4);
    }

    #[test]
    fn test_channels_follow_fifo_order() {
        let layout = TimeslotLayout::uniform(3, 0b101, 2);
        let order: Vec<u8> = layout.channels().collect();
        assert_eq!(order, vec![0, 1, 2, 4, 5]);
    }

    #[test]
    fn test_decode_big_endian_codes() {
        let layout = TimeslotLayout::new(2, 0b01, [3, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let bytes = [0x01, 0x02, 0x03, 0x0A, 0x0B, 0x0C, 0xBE, 0xEF];
        let frame = ChannelFrame::decode(&layout, &bytes).unwrap();
        assert_eq!(frame.code(0), 0x01_0203);
        assert_eq!(frame.code(1), 0x0A_0B0C);
        assert_eq!(frame.code(2), 0xBEEF);
        assert_eq!(frame.code(3), 0, "single-channel slot leaves ch2 at zero");
    }

    #[test]
    fn test_decode_rejects_short_input() {
        let layout = TimeslotLayout::uniform(4, 0xF, 4);
        assert_eq!(
            ChannelFrame::decode(&layout, &[0; 31]),
            Err(FrameError::Short { needed: 32, got: 31 })
        );
    }
}
