//! A single reusable transfer buffer.

use std::ops::Range;

/// One bulk transfer buffer plus its effective length.
///
/// Owned by the pool while idle and by exactly one caller between
/// `acquire` and `submit`. Not `Clone`, so a slot can never be held
/// twice.
#[derive(Debug)]
pub struct TransferSlot {
    id: usize,
    buf: Vec<u8>,
    size: usize,
    transfer_len: usize,
    origin: Option<Range<usize>>,
}

impl TransferSlot {
    /// Allocate a slot of `size` bytes, or `None` if memory is short.
    pub(crate) fn allocate(id: usize, size: usize) -> Option<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(size).ok()?;
        Some(Self {
            id,
            buf,
            size,
            transfer_len: size,
            origin: None,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Usable bytes per transfer.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes still free in the buffer.
    pub fn remaining(&self) -> usize {
        self.size.saturating_sub(self.buf.len())
    }

    /// Write cursor. Payloads longer than [`size`](Self::size) are
    /// rejected at submit.
    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    /// Bytes the next transfer will carry.
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.transfer_len.min(self.buf.len())]
    }

    pub fn transfer_len(&self) -> usize {
        self.transfer_len
    }

    pub(crate) fn set_transfer_len(&mut self, len: usize) {
        self.transfer_len = len;
    }

    /// Framebuffer bytes carried by this transfer, if it carries pixels.
    pub fn origin(&self) -> Option<Range<usize>> {
        self.origin.clone()
    }

    pub fn set_origin(&mut self, range: Range<usize>) {
        self.origin = Some(range);
    }

    /// Back to the idle state: empty buffer, full transfer length.
    pub(crate) fn reset(&mut self) {
        self.buf.clear();
        self.transfer_len = self.size;
        self.origin = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_restores_full_length() {
        let mut slot = TransferSlot::allocate(0, 64).unwrap();
        slot.buffer_mut().extend_from_slice(&[1, 2, 3]);
        slot.set_transfer_len(3);
        slot.set_origin(0..3);
        assert_eq!(slot.payload(), &[1, 2, 3]);
        assert_eq!(slot.remaining(), 61);

        slot.reset();
        assert_eq!(slot.transfer_len(), 64);
        assert!(slot.payload().is_empty());
        assert!(slot.origin().is_none());
    }

    #[test]
    fn impossible_allocation_fails() {
        assert!(TransferSlot::allocate(0, usize::MAX).is_none());
    }
}
