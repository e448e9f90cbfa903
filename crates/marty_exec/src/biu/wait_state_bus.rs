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

    biu::wait_state_bus.rs

    A flat memory BIU with programmable wait states. Each new transaction
    takes its wait state count from a script queue if one is loaded,
    otherwise from the default. Memory is only touched on the poll that
    completes the transaction.

    Issued transactions are kept in a bounded log; once it is full the
    oldest entries are dropped.

*/

use std::collections::VecDeque;

use crate::{
    biu::{BusAddress, BusPort, BusResponse, TransferSize},
    cpu_common::ProcessorGeneration,
};

/// Default number of issued transactions kept in the log.
pub const DEFAULT_LOG_LEN: usize = 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusKind {
    Read,
    Write,
}

/// A record of a transaction as it was issued to the bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BusTransaction {
    pub kind: BusKind,
    pub size: TransferSize,
    pub address: BusAddress,
    pub linear: u32,
    pub value: u32,
}

#[derive(Copy, Clone, Debug)]
struct InFlight {
    kind: BusKind,
    size: TransferSize,
    address: BusAddress,
    value: u32,
    remaining: u32,
}

impl InFlight {
    fn matches(&self, kind: BusKind, size: TransferSize, address: BusAddress, value: u32) -> bool {
        self.kind == kind && self.size == size && self.address == address && self.value == value
    }
}

pub struct WaitStateBus {
    mem: Vec<u8>,
    address_mask: u32,
    wait_states: u32,
    scripted: VecDeque<u32>,
    inflight: Option<InFlight>,
    transactions: VecDeque<BusTransaction>,
    log_len: usize,
    acks: u64,
    polls: u64,
    terminations: u64,
}

impl WaitStateBus {
    pub fn new(size: usize, generation: ProcessorGeneration) -> Self {
        Self {
            mem: vec![0; size],
            address_mask: generation.address_mask(),
            wait_states: 0,
            scripted: VecDeque::new(),
            inflight: None,
            transactions: VecDeque::new(),
            log_len: DEFAULT_LOG_LEN,
            acks: 0,
            polls: 0,
            terminations: 0,
        }
    }

    pub fn with_wait_states(mut self, wait_states: u32) -> Self {
        self.wait_states = wait_states;
        self
    }

    /// Keep at most `log_len` issued transactions. Zero disables the log.
    pub fn with_log_len(mut self, log_len: usize) -> Self {
        self.log_len = log_len;
        while self.transactions.len() > log_len {
            self.transactions.pop_front();
        }
        self
    }

    pub fn set_wait_states(&mut self, wait_states: u32) {
        self.wait_states = wait_states;
    }

    /// Queue a wait state count for the next transaction issued. Queued counts are consumed in
    /// order before the default applies again.
    pub fn script_wait_states(&mut self, wait_states: u32) {
        self.scripted.push_back(wait_states);
    }

    /// The most recently issued transactions, oldest first.
    pub fn transactions(&self) -> &VecDeque<BusTransaction> {
        &self.transactions
    }

    pub fn clear_log(&mut self) {
        self.transactions.clear();
        self.acks = 0;
        self.polls = 0;
        self.terminations = 0;
    }

    /// Number of times a transaction of `kind` targeting `linear` was issued.
    pub fn issue_count(&self, kind: BusKind, linear: u32) -> usize {
        self.transactions
            .iter()
            .filter(|t| t.kind == kind && t.linear == linear)
            .count()
    }

    pub fn acks(&self) -> u64 {
        self.acks
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    pub fn terminations(&self) -> u64 {
        self.terminations
    }

    pub fn in_flight(&self) -> bool {
        self.inflight.is_some()
    }

    pub fn load(&mut self, address: u32, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.poke_u8(address.wrapping_add(i as u32), *byte);
        }
    }

    pub fn peek_u8(&self, address: u32) -> u8 {
        let idx = (address & self.address_mask) as usize;
        self.mem.get(idx).copied().unwrap_or(0xFF)
    }

    pub fn peek_u16(&self, address: u32) -> u16 {
        self.peek(TransferSize::Word, address) as u16
    }

    pub fn peek_u32(&self, address: u32) -> u32 {
        self.peek(TransferSize::Dword, address)
    }

    pub fn poke_u8(&mut self, address: u32, value: u8) {
        let idx = (address & self.address_mask) as usize;
        if let Some(byte) = self.mem.get_mut(idx) {
            *byte = value;
        }
    }

    pub fn poke_u16(&mut self, address: u32, value: u16) {
        self.poke(TransferSize::Word, address, value as u32);
    }

    pub fn poke_u32(&mut self, address: u32, value: u32) {
        self.poke(TransferSize::Dword, address, value);
    }

    fn peek(&self, size: TransferSize, address: u32) -> u32 {
        (0..size.bytes()).fold(0u32, |acc, i| {
            acc | (self.peek_u8(address.wrapping_add(i)) as u32) << (i * 8)
        })
    }

    fn poke(&mut self, size: TransferSize, address: u32, value: u32) {
        for i in 0..size.bytes() {
            self.poke_u8(address.wrapping_add(i), (value >> (i * 8)) as u8);
        }
    }

    fn complete(&mut self, kind: BusKind, size: TransferSize, address: BusAddress, value: u32) -> u32 {
        self.acks += 1;
        let linear = address.to_linear(self.address_mask);
        match kind {
            BusKind::Read => self.peek(size, linear),
            BusKind::Write => {
                self.poke(size, linear, value & size.mask());
                0
            }
        }
    }

    fn log(&mut self, transaction: BusTransaction) {
        if self.log_len == 0 {
            return;
        }
        if self.transactions.len() == self.log_len {
            self.transactions.pop_front();
        }
        self.transactions.push_back(transaction);
    }

    fn request(&mut self, kind: BusKind, size: TransferSize, address: BusAddress, value: u32) -> BusResponse {
        self.polls += 1;

        if let Some(mut inflight) = self.inflight {
            if inflight.matches(kind, size, address, value) {
                if inflight.remaining > 0 {
                    inflight.remaining -= 1;
                    self.inflight = Some(inflight);
                    return BusResponse::Pending;
                }
                self.inflight = None;
                return BusResponse::Ready(self.complete(kind, size, address, value));
            }
            log::warn!(
                "BIU: {:?} request at {} replaces in-flight {:?} at {}",
                kind,
                address,
                inflight.kind,
                inflight.address
            );
            self.inflight = None;
        }

        self.log(BusTransaction {
            kind,
            size,
            address,
            linear: address.to_linear(self.address_mask),
            value,
        });

        let waits = self.scripted.pop_front().unwrap_or(self.wait_states);
        if waits == 0 {
            BusResponse::Ready(self.complete(kind, size, address, value))
        }
        else {
            self.inflight = Some(InFlight {
                kind,
                size,
                address,
                value,
                remaining: waits - 1,
            });
            BusResponse::Pending
        }
    }
}

impl BusPort for WaitStateBus {
    fn request_read(&mut self, size: TransferSize, address: BusAddress) -> BusResponse {
        self.request(BusKind::Read, size, address, 0)
    }

    fn request_write(&mut self, size: TransferSize, address: BusAddress, value: u32) -> BusResponse {
        self.request(BusKind::Write, size, address, value)
    }

    fn terminate_access(&mut self) {
        self.terminations += 1;
        if let Some(inflight) = self.inflight.take() {
            log::trace!("BIU: terminating in-flight {:?} at {}", inflight.kind, inflight.address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_wait_read() {
        let mut bus = WaitStateBus::new(0x10000, ProcessorGeneration::Intel8086);
        bus.poke_u16(0x100, 0xBEEF);
        assert_eq!(
            bus.request_read(TransferSize::Word, BusAddress::Linear(0x100)),
            BusResponse::Ready(0xBEEF)
        );
        assert_eq!(bus.transactions().len(), 1);
        assert!(!bus.in_flight());
    }

    #[test]
    fn test_wait_states_delay_write() {
        let mut bus = WaitStateBus::new(0x10000, ProcessorGeneration::Intel8086).with_wait_states(2);
        let addr = BusAddress::Segmented(0x0010, 0x0004);

        assert_eq!(bus.request_write(TransferSize::Word, addr, 0x1234), BusResponse::Pending);
        assert_eq!(bus.peek_u16(0x104), 0);
        assert_eq!(bus.request_write(TransferSize::Word, addr, 0x1234), BusResponse::Pending);
        assert_eq!(bus.peek_u16(0x104), 0);
        assert_eq!(bus.request_write(TransferSize::Word, addr, 0x1234), BusResponse::Ready(0));
        assert_eq!(bus.peek_u16(0x104), 0x1234);

        // Polls of the same transaction are not new transactions.
        assert_eq!(bus.issue_count(BusKind::Write, 0x104), 1);
        assert_eq!(bus.acks(), 1);
    }

    #[test]
    fn test_scripted_wait_states() {
        let mut bus = WaitStateBus::new(0x1000, ProcessorGeneration::Intel8086);
        bus.script_wait_states(1);
        let addr = BusAddress::Linear(0x10);
        assert_eq!(bus.request_read(TransferSize::Byte, addr), BusResponse::Pending);
        assert_eq!(bus.request_read(TransferSize::Byte, addr), BusResponse::Ready(0));
        // Script exhausted, back to zero wait states.
        assert_eq!(bus.request_read(TransferSize::Byte, addr), BusResponse::Ready(0));
        assert_eq!(bus.issue_count(BusKind::Read, 0x10), 2);
    }

    #[test]
    fn test_terminate_drops_reservation() {
        let mut bus = WaitStateBus::new(0x1000, ProcessorGeneration::Intel8086).with_wait_states(3);
        let addr = BusAddress::Linear(0x20);
        assert_eq!(bus.request_write(TransferSize::Byte, addr, 0x55), BusResponse::Pending);
        bus.terminate_access();
        assert!(!bus.in_flight());
        assert_eq!(bus.peek_u8(0x20), 0);
        assert_eq!(bus.terminations(), 1);
    }

    #[test]
    fn test_log_is_bounded() {
        let mut bus = WaitStateBus::new(0x1000, ProcessorGeneration::Intel8086).with_log_len(4);
        for offset in 0..10u32 {
            let _ = bus.request_write(TransferSize::Byte, BusAddress::Linear(offset), offset);
        }
        assert_eq!(bus.transactions().len(), 4);
        assert_eq!(bus.transactions()[0].linear, 6);
        assert_eq!(bus.transactions()[3].linear, 9);
        assert_eq!(bus.acks(), 10);

        let mut bus = WaitStateBus::new(0x1000, ProcessorGeneration::Intel8086).with_log_len(0);
        let _ = bus.request_read(TransferSize::Byte, BusAddress::Linear(0));
        assert!(bus.transactions().is_empty());
        assert_eq!(bus.peek_u8(0), 0);
    }

    #[test]
    fn test_address_wrap_8086() {
        let mut bus = WaitStateBus::new(0x10_0000, ProcessorGeneration::Intel8086);
        bus.poke_u8(0x0000, 0xAA);
        assert_eq!(
            bus.request_read(TransferSize::Byte, BusAddress::Segmented(0xFFFF, 0x0010)),
            BusResponse::Ready(0xAA)
        );
    }
}
