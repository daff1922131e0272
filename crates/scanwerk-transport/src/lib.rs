// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk transport: command framing and the two wire shapes a scanner
// can speak: synchronous block commands with a request-sense side channel,
// and byte streams with a polled status byte.

pub mod block;
pub mod channel;
pub mod command;
pub mod retry;
pub mod sense;
pub mod stream;
pub mod wire;

pub use block::{BlockTransport, BusFault, ScsiBus};
pub use channel::{Transport, TransportKind};
pub use command::Command;
pub use sense::SenseData;
pub use stream::{PipeFault, StatusEndpoint, StreamTransport, UsbPipe};
pub use wire::{CalibrationFormat, FrontendRegisters, WindowDescriptor};
