//! Media frames stored in track rings
//!
//! An [`AvFrame`] keeps the publisher's access units as a list of `Bytes`
//! spans and carries up to three derived views built on demand at flush:
//!
//! | View      | Content                                                   |
//! |-----------|-----------------------------------------------------------|
//! | `au_list` | access units, each a list of NAL units / OBUs / raw audio |
//! | `avcc`    | FLV/RTMP body: tag header then length-prefixed units      |
//! | `rtp`     | packets from the track's packetizer                       |
//! | `flv`     | `avcc` wrapped in an FLV tag header and size trailer      |
//!
//! Small headers are written into blocks drawn from the track's
//! [`BytesPool`]; resetting a frame hands them back.

pub mod view;

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use crate::media::BytesPool;
use crate::ring::RingValue;
use crate::rtp::RtpPacket;

/// 90 kHz ticks per millisecond
pub const TICKS_PER_MS: u32 = 90;

/// Backward DTS steps up to this size are jitter, not a wrap
const MAX_REGRESSION: u32 = 10_000 * TICKS_PER_MS;

/// Ticks from `from` forward to `to` on the wrapping 32-bit clock
///
/// A small step backwards counts as zero. Anything else is read as a
/// forward distance, so gaps past 2^31 ticks stay positive.
pub(crate) fn forward_ticks(from: u32, to: u32) -> u32 {
    let back = from.wrapping_sub(to);
    if back != 0 && back <= MAX_REGRESSION {
        0
    } else {
        to.wrapping_sub(from)
    }
}

/// One audio or video frame
#[derive(Debug, Clone, Default)]
pub struct AvFrame {
    /// Wall clock time the frame was published
    pub written_at: Option<Instant>,
    /// Milliseconds since the track's first frame (DTS based)
    pub abs_time: u32,
    /// Milliseconds since the previous frame
    pub delta_time: u32,
    /// Presentation timestamp, 90 kHz
    pub pts: u32,
    /// Decode timestamp, 90 kHz
    pub dts: u32,
    /// Ring sequence, copied at flush
    pub sequence: u32,
    /// Random access point (always set for audio)
    pub iframe: bool,
    pub au_list: Vec<Vec<Bytes>>,
    pub avcc: Vec<Bytes>,
    pub rtp: Vec<RtpPacket>,
    pub flv: Vec<Bytes>,
    blocks: Vec<Bytes>,
    pool: Option<Arc<BytesPool>>,
}

impl AvFrame {
    /// Append a unit to the last access unit, opening one if needed
    pub fn append_unit(&mut self, unit: Bytes) {
        match self.au_list.last_mut() {
            Some(au) => au.push(unit),
            None => self.au_list.push(vec![unit]),
        }
    }

    /// Start a new access unit
    pub fn push_au(&mut self, au: Vec<Bytes>) {
        self.au_list.push(au);
    }

    /// Insert units at the front of the first access unit
    pub fn prepend_units(&mut self, units: Vec<Bytes>) {
        if units.is_empty() {
            return;
        }
        match self.au_list.first_mut() {
            Some(au) => {
                au.splice(0..0, units);
            }
            None => self.au_list.push(units),
        }
    }

    /// All units of all access units, in order
    pub fn units(&self) -> impl Iterator<Item = &Bytes> {
        self.au_list.iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.au_list.iter().all(|au| au.is_empty())
    }

    /// Payload bytes across the AU list
    pub fn payload_len(&self) -> usize {
        self.units().map(|u| u.len()).sum()
    }

    /// Composition offset PTS - DTS in 90 kHz ticks
    pub fn cts(&self) -> i32 {
        self.pts.wrapping_sub(self.dts) as i32
    }

    /// Bytes of the AVCC view
    pub fn avcc_len(&self) -> usize {
        self.avcc.iter().map(|b| b.len()).sum()
    }

    /// Record a pooled block so reset can return it
    pub(crate) fn keep_block(&mut self, pool: &Arc<BytesPool>, block: Bytes) {
        if self.pool.is_none() {
            self.pool = Some(Arc::clone(pool));
        }
        self.blocks.push(block);
    }

    /// Copy without pooled block ownership, for handing to subscribers
    pub fn detach(&self) -> AvFrame {
        AvFrame {
            written_at: self.written_at,
            abs_time: self.abs_time,
            delta_time: self.delta_time,
            pts: self.pts,
            dts: self.dts,
            sequence: self.sequence,
            iframe: self.iframe,
            au_list: self.au_list.clone(),
            avcc: self.avcc.clone(),
            rtp: self.rtp.clone(),
            flv: self.flv.clone(),
            blocks: Vec::new(),
            pool: None,
        }
    }
}

impl RingValue for AvFrame {
    fn reset(&mut self) {
        // views first: blocks are only reclaimable once no slice points into them
        self.au_list.clear();
        self.avcc.clear();
        self.rtp.clear();
        self.flv.clear();
        if let Some(pool) = &self.pool {
            for block in self.blocks.drain(..) {
                pool.recycle(block);
            }
        }
        self.blocks.clear();
        self.written_at = None;
        self.abs_time = 0;
        self.delta_time = 0;
        self.pts = 0;
        self.dts = 0;
        self.sequence = 0;
        self.iframe = false;
    }
}

/// A frame on an opaque data track
#[derive(Debug, Clone)]
pub struct DataFrame<T> {
    pub written_at: Option<Instant>,
    pub sequence: u32,
    pub data: Option<T>,
}

impl<T> Default for DataFrame<T> {
    fn default() -> Self {
        Self {
            written_at: None,
            sequence: 0,
            data: None,
        }
    }
}

impl<T: Send + Sync + 'static> RingValue for DataFrame<T> {
    fn reset(&mut self) {
        self.written_at = None;
        self.sequence = 0;
        self.data = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_prepend_units() {
        let mut frame = AvFrame::default();
        frame.append_unit(Bytes::from_static(&[0x65, 0x01]));
        frame.append_unit(Bytes::from_static(&[0x65, 0x02]));
        frame.prepend_units(vec![Bytes::from_static(&[0x06, 0x05])]);

        assert_eq!(frame.au_list.len(), 1);
        let first: Vec<u8> = frame.units().map(|u| u[0]).collect();
        assert_eq!(first, vec![0x06, 0x65, 0x65]);
        assert_eq!(frame.payload_len(), 6);
    }

    #[test]
    fn test_forward_ticks() {
        assert_eq!(forward_ticks(1000, 4600), 3600);
        assert_eq!(forward_ticks(u32::MAX - 99, 100), 200);
        // jitter backwards
        assert_eq!(forward_ticks(4600, 1000), 0);
        // seven hours is past i32::MAX ticks but still forward
        let seven_hours = 7 * 3600 * 90_000;
        assert_eq!(forward_ticks(0, seven_hours), seven_hours);
        assert_eq!(forward_ticks(5, 5), 0);
    }

    #[test]
    fn test_cts_signed() {
        let frame = AvFrame {
            pts: 3000,
            dts: 6000,
            ..Default::default()
        };
        assert_eq!(frame.cts(), -3000);
    }

    #[test]
    fn test_reset_returns_blocks_to_pool() {
        let pool = Arc::new(BytesPool::new());
        let mut frame = AvFrame::default();
        let block = pool.copy_from(&[1, 2, 3, 4, 5]);
        frame.avcc.push(block.slice(0..2));
        frame.keep_block(&pool, block);
        frame.iframe = true;

        frame.reset();
        assert!(frame.avcc.is_empty());
        assert!(!frame.iframe);

        let before = pool.reused();
        let _ = pool.get(5);
        assert_eq!(pool.reused(), before + 1);
    }

    #[test]
    fn test_detached_copy_keeps_block_alive() {
        let pool = Arc::new(BytesPool::new());
        let mut frame = AvFrame::default();
        let block = pool.copy_from(&[9; 8]);
        frame.avcc.push(block.slice(0..4));
        frame.keep_block(&pool, block);

        let copy = frame.detach();
        frame.reset();
        // still referenced by the copy, so not pooled
        assert_eq!(&copy.avcc[0][..], &[9; 4]);
        let before = pool.reused();
        let _ = pool.get(8);
        assert_eq!(pool.reused(), before);
    }

    #[test]
    fn test_data_frame_reset() {
        let mut frame = DataFrame {
            written_at: Some(Instant::now()),
            sequence: 4,
            data: Some(String::from("meta")),
        };
        frame.reset();
        assert!(frame.data.is_none());
        assert_eq!(frame.sequence, 0);
    }
}
