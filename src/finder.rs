//! Gadget Finder.
//!
//! Steps forward through an executable segment by the architecture's
//! instruction alignment, handing each window of up to
//! `arch.max_gadget_size()` bytes to the classifier. The classifier
//! itself decides where a window's useful prefix ends; the Finder does
//! no deduplication (that happens at catalogue insertion) and does not
//! re-invoke classification inside its own loop, which would otherwise
//! inflate the gadget list with repeated work over overlapping windows.

use crate::arch::Arch;
use crate::reader::Segment;

/// One candidate byte window and the address its first byte loads at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub bytes: Vec<u8>,
    pub address: u64,
}

/// Sweep `segment` for candidate windows at every instruction-aligned
/// offset.
pub fn sweep<'a>(segment: &'a Segment, arch: &'a Arch) -> impl Iterator<Item = Candidate> + 'a {
    let window = arch.max_gadget_size();
    let align = arch.align as usize;
    let len = segment.bytes.len();
    (0..len).step_by(align.max(1)).filter_map(move |offset| {
        if offset >= len {
            return None;
        }
        let end = (offset + window).min(len);
        if end <= offset {
            return None;
        }
        Some(Candidate {
            bytes: segment.bytes[offset..end].to_vec(),
            address: segment.address.wrapping_add(offset as u64),
        })
    })
}
