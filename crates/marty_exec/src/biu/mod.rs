/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    ---------------------------------------------------------------------------

    biu::mod.rs

    The transaction port between the execution unit and the Bus Interface
    Unit. The execution unit only ever asks; the BIU decides when a transfer
    is complete. A request that is not yet complete is simply asked again on
    a later tick with the same parameters.

*/

pub mod wait_state_bus;

use std::fmt;

pub use wait_state_bus::{BusTransaction, WaitStateBus};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum TransferSize {
    Byte,
    #[default]
    Word,
    Dword,
}

impl TransferSize {
    #[inline]
    pub fn bytes(&self) -> u32 {
        match self {
            TransferSize::Byte => 1,
            TransferSize::Word => 2,
            TransferSize::Dword => 4,
        }
    }

    #[inline]
    pub fn mask(&self) -> u32 {
        match self {
            TransferSize::Byte => 0xFF,
            TransferSize::Word => 0xFFFF,
            TransferSize::Dword => 0xFFFF_FFFF,
        }
    }
}

impl From<crate::cpu_common::OperandSize> for TransferSize {
    fn from(size: crate::cpu_common::OperandSize) -> Self {
        match size {
            crate::cpu_common::OperandSize::Size16 => TransferSize::Word,
            crate::cpu_common::OperandSize::Size32 => TransferSize::Dword,
        }
    }
}

/// An address as presented to the BIU. Segmented addresses carry the segment register value,
/// not a selector lookup; translation belongs to the BIU/MMU side.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BusAddress {
    Linear(u32),
    Segmented(u16, u32),
}

impl BusAddress {
    /// Real-mode translation, truncated to the supplied address bus mask.
    #[inline]
    pub fn to_linear(&self, mask: u32) -> u32 {
        match *self {
            BusAddress::Linear(addr) => addr & mask,
            BusAddress::Segmented(segment, offset) => (((segment as u32) << 4).wrapping_add(offset)) & mask,
        }
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusAddress::Linear(addr) => write!(f, "[{:08X}]", addr),
            BusAddress::Segmented(segment, offset) => write!(f, "[{:04X}:{:04X}]", segment, offset),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusResponse {
    /// The transfer is in progress (wait states). Ask again next tick.
    Pending,
    /// The transfer completed. Reads carry their data; writes carry 0.
    Ready(u32),
}

/// The BIU transaction port consumed by instruction steps.
///
/// Implementors must treat a repeated request with identical parameters as a poll of the
/// transaction already in flight, never as a second transfer.
pub trait BusPort {
    fn request_read(&mut self, size: TransferSize, address: BusAddress) -> BusResponse;
    fn request_write(&mut self, size: TransferSize, address: BusAddress, value: u32) -> BusResponse;
    /// Release any BIU-side reservation at the end of an instruction.
    fn terminate_access(&mut self);
}

impl<T: BusPort + ?Sized> BusPort for Box<T> {
    fn request_read(&mut self, size: TransferSize, address: BusAddress) -> BusResponse {
        (**self).request_read(size, address)
    }

    fn request_write(&mut self, size: TransferSize, address: BusAddress, value: u32) -> BusResponse {
        (**self).request_write(size, address, value)
    }

    fn terminate_access(&mut self) {
        (**self).terminate_access()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segmented_translation() {
        let addr = BusAddress::Segmented(0xFFFF, 0x0010);
        assert_eq!(addr.to_linear(0x000F_FFFF), 0x0000_0000);
        assert_eq!(addr.to_linear(0x00FF_FFFF), 0x0010_0000);
        assert_eq!(BusAddress::Linear(0x1234).to_linear(0xFFFF_FFFF), 0x1234);
    }
}
