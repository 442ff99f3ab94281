// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the serial byte channel.
//!
//! The UART driver itself belongs to the platform; the kernel side only
//! needs a non-blocking byte source and a sink that is allowed to
//! busy-wait on the hardware FIFO. The filesystem's upload protocol is the
//! main consumer.

#![cfg_attr(target_os = "none", no_std)]

pub trait ByteChannel {
    /// Takes one received byte if the hardware has one.
    fn try_read_byte(&mut self) -> Option<u8>;

    /// Emits one byte, busy-waiting for FIFO space if it must.
    fn write_byte(&mut self, b: u8);

    /// Emits a buffer, byte at a time.
    fn write_all(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }
}

impl<C: ByteChannel + ?Sized> ByteChannel for &mut C {
    fn try_read_byte(&mut self) -> Option<u8> {
        (**self).try_read_byte()
    }

    fn write_byte(&mut self, b: u8) {
        (**self).write_byte(b)
    }
}
