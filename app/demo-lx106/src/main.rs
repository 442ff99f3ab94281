// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reference application for the LX106-class board.
//!
//! This is the wiring diagram the kernel documents but cannot enforce:
//! the boot trampoline (a collaborator, not part of this tree) calls
//! [`app_main`] with the vector installed and the ROM thunks reachable,
//! and `app_main` brings the system up in the documented order —
//!
//!     log sink → pool → heap → filesystem → scheduler → tasks →
//!     peripheral handlers → start
//!
//! — then hands the CPU to the kernel forever. The demo tasks are a
//! heartbeat (sleep-driven counter) and a producer/consumer pair over a
//! message queue, enough traffic to watch preemption, blocking, and
//! hand-over do their jobs from a serial console.
//!
//! Hosted builds compile to a stub; this binary only means something on
//! the target.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod demo {
    use core::sync::atomic::{AtomicU32, Ordering};

    use abi::fs::SECTOR_SIZE;
    use abi::Priority;
    use drv_flash_api::{Flash, FlashError};
    use drv_flat_fs::{FlatFs, FsConfig};
    use kern::dispatch::Cause;
    use kern::mq::MsgQueue;
    use kern::{heap::Heap, klog, pool::Pool, sched, startup, time};

    /// 80 MHz core, 100 Hz tick.
    const TICK_DIVISOR: u32 = 800_000;

    /// The filesystem region: the top 1 MiB of the 4 MiB part.
    const FS_BASE: u32 = 0x30_0000;
    const FS_SECTORS: u16 = (0x10_0000 / SECTOR_SIZE) as u16;

    // ROM thunks the platform links in. All of them obey the alignment
    // contract described in `drv-flash-api`.
    extern "C" {
        fn rom_spi_flash_read(addr: u32, dst: *mut u8, len: usize) -> i32;
        fn rom_spi_flash_write(addr: u32, src: *const u8, len: usize) -> i32;
        fn rom_spi_flash_erase_sector(index: u16) -> i32;
        fn rom_uart_tx_one_char(b: u8);
    }

    struct RomFlash;

    impl Flash for RomFlash {
        fn read(&self, addr: u32, dst: &mut [u8]) -> Result<(), FlashError> {
            // Safety: the thunk reads `len` bytes into our exclusive
            // buffer.
            let rc = unsafe { rom_spi_flash_read(addr, dst.as_mut_ptr(), dst.len()) };
            flash_rc(rc)
        }

        fn write(&mut self, addr: u32, src: &[u8]) -> Result<(), FlashError> {
            // Safety: the thunk only reads from `src`.
            let rc = unsafe { rom_spi_flash_write(addr, src.as_ptr(), src.len()) };
            flash_rc(rc)
        }

        fn erase_sector(&mut self, index: u16) -> Result<(), FlashError> {
            // Safety: erases one whole sector, an operation with no
            // aliasing to worry about.
            let rc = unsafe { rom_spi_flash_erase_sector(index) };
            flash_rc(rc)
        }
    }

    fn flash_rc(rc: i32) -> Result<(), FlashError> {
        if rc == 0 {
            Ok(())
        } else {
            Err(FlashError::Device)
        }
    }

    fn uart_sink(b: u8) {
        // Safety: the ROM routine busy-waits on FIFO space.
        unsafe { rom_uart_tx_one_char(b) };
    }

    // Memory the allocators own. Carved out here rather than in the
    // kernel so the application decides the split. Word-aligned, as both
    // allocators require.
    #[repr(C, align(4))]
    struct Region<const N: usize>([u8; N]);

    const POOL_BLOCK: usize = 128;
    static mut POOL_REGION: Region<{ POOL_BLOCK * 16 }> = Region([0; POOL_BLOCK * 16]);
    static mut HEAP_REGION: Region<{ 16 * 1024 }> = Region([0; 16 * 1024]);

    // Demo traffic: producer -> consumer, u32 payloads, four slots.
    const Q_MSG: usize = 4;
    const Q_CAP: usize = 4;
    static mut Q_STORAGE: [u8; Q_MSG * Q_CAP] = [0; Q_MSG * Q_CAP];
    static mut QUEUE: Option<MsgQueue> = None;

    static HEARTBEATS: AtomicU32 = AtomicU32::new(0);
    static CONSUMED: AtomicU32 = AtomicU32::new(0);

    /// Shared handle to the demo queue. `app_main` fills the option in
    /// before the scheduler starts; tasks run strictly after.
    fn queue() -> &'static MsgQueue {
        // Safety: written once during init, read-only ever after.
        match unsafe { (*core::ptr::addr_of!(QUEUE)).as_ref() } {
            Some(q) => q,
            None => panic!("queue used before init"),
        }
    }

    fn heartbeat_task(_arg: usize) {
        loop {
            let n = HEARTBEATS.fetch_add(1, Ordering::Relaxed) + 1;
            klog!("heartbeat {} at tick {}", n, time::now());
            sched::sleep(200);
        }
    }

    fn producer_task(_arg: usize) {
        let mut next = 0u32;
        loop {
            // Backpressure comes from the queue itself: this blocks when
            // four messages are in flight.
            let _ = queue().send(&next.to_le_bytes());
            next = next.wrapping_add(1);
        }
    }

    fn consumer_task(_arg: usize) {
        let mut buf = [0u8; Q_MSG];
        loop {
            if queue().recv(&mut buf).is_ok() {
                let v = u32::from_le_bytes(buf);
                CONSUMED.fetch_add(1, Ordering::Relaxed);
                if v % 1000 == 0 {
                    klog!("consumed {}", v);
                }
            }
            // Let the heartbeat in even under full-rate traffic.
            sched::yield_now();
        }
    }

    /// Entry point, called by the boot trampoline after hardware init.
    #[no_mangle]
    pub extern "C" fn app_main() -> ! {
        // 1. A byte sink first, so everything later can complain.
        kern::log::set_sink(uart_sink);
        klog!("demo-lx106: boot");

        // 2. Allocators.
        // Safety: each region is handed to its owner exactly once.
        let pool_region = unsafe { &mut (*core::ptr::addr_of_mut!(POOL_REGION)).0 };
        let heap_region = unsafe { &mut (*core::ptr::addr_of_mut!(HEAP_REGION)).0 };
        let pool = match Pool::new(pool_region, POOL_BLOCK) {
            Ok(p) => p,
            Err(_) => panic!("pool geometry"),
        };
        let heap = match Heap::new(heap_region) {
            Ok(h) => h,
            Err(_) => panic!("heap geometry"),
        };
        klog!(
            "mem: {} pool blocks, {} heap bytes",
            pool.free_count(),
            heap.free_total()
        );

        // 3. Filesystem: mount, or format a factory-blank part.
        let cfg = FsConfig {
            base_addr: FS_BASE,
            total_sectors: FS_SECTORS,
            upload_timeout_ticks: 10 * time::TICK_HZ,
        };
        let mut fs = match FlatFs::new(RomFlash, cfg) {
            Ok(fs) => fs,
            Err(_) => panic!("fs geometry"),
        };
        if fs.mount().is_err() {
            klog!("fs: blank flash, formatting");
            if fs.format().is_err() {
                panic!("fs format failed");
            }
        }
        match fs.file_count() {
            Ok(n) => klog!("fs: {} files", n),
            Err(_) => klog!("fs: unreadable superblock"),
        }

        // 4. Scheduler, then the demo tasks.
        sched::init();
        // Safety: storage handed over exactly once, before tasks exist.
        let q_storage = unsafe { &mut *core::ptr::addr_of_mut!(Q_STORAGE) };
        let q = match MsgQueue::new(q_storage, Q_MSG, Q_CAP) {
            Ok(q) => q,
            Err(_) => panic!("queue geometry"),
        };
        // Safety: single write before the scheduler starts.
        unsafe { *core::ptr::addr_of_mut!(QUEUE) = Some(q) };

        let create = |name: &'static str, entry: fn(usize), pri: u8| {
            match sched::task_create(name, entry, 0, Priority(pri)) {
                Ok(id) => id,
                Err(_) => panic!("task slots exhausted"),
            }
        };
        create("heart", heartbeat_task, 3);
        create("producer", producer_task, 1);
        create("consumer", consumer_task, 1);

        // 5. Hand over. Uses only the tick and soft-yield sources; the
        // serial console of the full firmware would add its line here.
        // Safety: called once, vector installed by the boot trampoline.
        unsafe { startup::start_kernel(TICK_DIVISOR, Cause::empty()) }
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
        // Best effort: the sink may not be up yet.
        let _ = info;
        klog!("panic");
        loop {
            core::hint::spin_loop();
        }
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    println!("demo-lx106 is a target binary; build it for the board.");
}
