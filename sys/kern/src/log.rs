// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel log output through the byte-sink seam.
//!
//! The kernel has no serial driver of its own; the platform registers a
//! byte sink at startup and `klog!` formats through it. Invariant
//! violations that the error policy says to swallow (a bad `free` pointer,
//! a corrupt heap header) are reported here so they leave a trace instead
//! of vanishing. If no sink is registered, logging is a no-op.

use critsec::IrqCell;

static SINK: IrqCell<Option<fn(u8)>> = IrqCell::new(None);

/// Registers the byte sink used by [`klog!`]. The function may busy-wait
/// on the hardware FIFO; it is always called with interrupts masked, so it
/// must not block on another task.
pub fn set_sink(sink: fn(u8)) {
    SINK.with(|s| *s = Some(sink));
}

#[doc(hidden)]
pub fn write_fmt(args: core::fmt::Arguments<'_>) {
    use core::fmt::Write;

    let sink = SINK.with(|s| *s);
    if let Some(sink) = sink {
        // Errors from fmt have nowhere useful to go.
        let _ = SinkWriter(sink).write_fmt(args);
    }
}

struct SinkWriter(fn(u8));

impl core::fmt::Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for &b in s.as_bytes() {
            (self.0)(b);
        }
        Ok(())
    }
}

/// Formats a line to the registered byte sink, appending a newline.
#[macro_export]
macro_rules! klog {
    ($($arg:tt)*) => {
        $crate::log::write_fmt(format_args!("{}\n", format_args!($($arg)*)))
    };
}
