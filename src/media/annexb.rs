//! Annex-B byte stream helpers
//!
//! Annex-B delimits NAL units with start codes:
//! - 4-byte: `0x00 0x00 0x00 0x01`
//! - 3-byte: `0x00 0x00 0x01`
//!
//! Splitting is zero-copy: every NALU is a `Bytes` slice of the input.

use bytes::{BufMut, Bytes, BytesMut};

/// 4-byte start code
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Find the next start code at or after `from`
///
/// Returns `(position, start_code_len)`.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if data[i + 2] == 0 && i + 4 <= data.len() && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Split an annex-B buffer into NAL units
///
/// Leading bytes before the first start code are treated as a NALU when the
/// buffer carries no start code at all (bare NALU input).
pub fn split_nalus(data: &Bytes) -> Vec<Bytes> {
    let mut nalus = Vec::new();

    let Some((first, len)) = find_start_code(data, 0) else {
        if !data.is_empty() {
            nalus.push(data.clone());
        }
        return nalus;
    };

    let mut start = first + len;
    loop {
        match find_start_code(data, start) {
            Some((pos, len)) => {
                if pos > start {
                    nalus.push(trim_trailing_zeros(data.slice(start..pos)));
                }
                start = pos + len;
            }
            None => {
                if start < data.len() {
                    nalus.push(data.slice(start..));
                }
                break;
            }
        }
    }

    nalus
}

/// Strip `trailing_zero_8bits` that precede a 4-byte start code
fn trim_trailing_zeros(mut nalu: Bytes) -> Bytes {
    let mut end = nalu.len();
    while end > 1 && nalu[end - 1] == 0 {
        end -= 1;
    }
    nalu.truncate(end);
    nalu
}

/// Serialize NAL units as annex-B with 4-byte start codes
pub fn join_nalus<'a, I>(nalus: I) -> BytesMut
where
    I: IntoIterator<Item = &'a Bytes>,
{
    let mut out = BytesMut::new();
    for nalu in nalus {
        out.put_slice(&START_CODE);
        out.put_slice(nalu);
    }
    out
}
