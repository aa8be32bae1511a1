//! Inter-core calls.
//!
//! A function defined with [`core_pinned!`] always executes on its named
//! core. Called from that core it runs inline. Called from the other core,
//! the caller masks interrupts, copies the argument by value into its
//! outgoing [`Slot`], publishes the function, raises the send-event
//! interrupt on the target and spins until the target's handler
//! ([`Mailbox::service`]) clears the function pointer.
//!
//! No address of caller memory crosses cores: the CM7 stack sits in DTCM,
//! which the CM4 cannot reach. The mailbox must live in memory both cores
//! see uncached (SRAM4 with the MPU region from
//! [`crate::mpu::MpuRegion::shared_sram4`]).
//!
//! A pinned body must not call a function pinned to the other core: both
//! cores would spin with interrupts masked. There is no timeout.

use core::sync::atomic::{AtomicI32, AtomicU32, AtomicUsize, Ordering};

use crate::critical::{self, InterruptControl};
use crate::error::Result;
use crate::mmio::{Field, Mmio};
use crate::nvic;

/// CPUID register of the System Control Block.
pub const CPUID: u32 = 0xE000_ED00;
/// PARTNO field of CPUID.
pub const CPUID_PARTNO: Field = Field::new(4, 12);
/// PARTNO of the Cortex-M7.
pub const PARTNO_CORTEX_M7: u32 = 0xC27;

/// Send-event interrupt serviced by the Cortex-M7.
pub const SEV_IRQ_CM7: u16 = 65;
/// Send-event interrupt serviced by the Cortex-M4.
pub const SEV_IRQ_CM4: u16 = 64;

/// Argument words a slot carries.
pub const ARG_WORDS: usize = 4;
/// Largest argument, in bytes, a pinned function may take.
pub const ARG_BYTES: usize = 16;

/// Argument of one call, as copied into the mailbox.
pub type Args = [u32; ARG_WORDS];

/// One of the two cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CoreId {
    /// Cortex-M7, the application core.
    Cm7,
    /// Cortex-M4, the auxiliary core.
    Cm4,
}

impl CoreId {
    /// Identify the core from a CPUID value.
    pub const fn from_cpuid(cpuid: u32) -> Self {
        if CPUID_PARTNO.decode(cpuid) == PARTNO_CORTEX_M7 {
            Self::Cm7
        } else {
            Self::Cm4
        }
    }

    /// The core executing this code, read through `bus`.
    pub fn current(bus: &impl Mmio) -> Self {
        Self::from_cpuid(bus.read(CPUID))
    }

    /// The other core.
    pub const fn other(self) -> Self {
        match self {
            Self::Cm7 => Self::Cm4,
            Self::Cm4 => Self::Cm7,
        }
    }

    /// Send-event interrupt this core services.
    pub const fn sev_irq(self) -> u16 {
        match self {
            Self::Cm7 => SEV_IRQ_CM7,
            Self::Cm4 => SEV_IRQ_CM4,
        }
    }
}

/// What the call path needs from the executing core.
pub trait CoreOps: InterruptControl {
    /// Core executing the caller.
    fn current_core(&self) -> CoreId;
    /// Raise the send-event interrupt on the other core.
    fn send_event(&self);
}

/// Plain data a pinned function may take by value.
///
/// # Safety
///
/// Implementors hold no padding bytes and no pointers.
pub unsafe trait MailboxArg: Copy {}

macro_rules! mailbox_args {
    ($($ty:ty),*) => {
        $(
            // SAFETY: primitive without padding or indirection.
            unsafe impl MailboxArg for $ty {}
        )*
    };
}

mailbox_args!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64, bool);

// SAFETY: an array of padding-free elements has no padding.
unsafe impl<T: MailboxArg, const N: usize> MailboxArg for [T; N] {}

/// Copy `value` into argument words. Zero words when `T` is larger than
/// [`ARG_BYTES`]; [`core_pinned!`] rejects such types at compile time.
pub fn pack<T: MailboxArg>(value: T) -> Args {
    let mut args: Args = [0; ARG_WORDS];
    if core::mem::size_of::<T>() <= ARG_BYTES {
        // SAFETY: `T` fits the array; the write tolerates any alignment.
        unsafe { core::ptr::write_unaligned(args.as_mut_ptr().cast::<T>(), value) };
    }
    args
}

/// Read back the value [`pack`] stored.
///
/// # Safety
///
/// `args` must come from `pack::<T>` and `T` must fit [`ARG_BYTES`].
pub unsafe fn unpack<T: MailboxArg>(args: &Args) -> T {
    // SAFETY: upheld by the caller.
    unsafe { core::ptr::read_unaligned(args.as_ptr().cast::<T>()) }
}

/// Function placed in a slot.
pub type Entry = unsafe fn(&Args) -> i32;

/// One direction of the mailbox. Empty while `func` is zero.
#[derive(Debug)]
pub struct Slot {
    func: AtomicUsize,
    args: [AtomicU32; ARG_WORDS],
    ret: AtomicI32,
}

impl Slot {
    /// Empty slot.
    pub const fn new() -> Self {
        Self {
            func: AtomicUsize::new(0),
            args: [
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
            ],
            ret: AtomicI32::new(0),
        }
    }

    /// `true` while a call is waiting for the executor.
    pub fn is_pending(&self) -> bool {
        self.func.load(Ordering::Acquire) != 0
    }

    /// Raw `(func, args, ret)` words.
    pub fn snapshot(&self) -> (usize, Args, i32) {
        let func = self.func.load(Ordering::Acquire);
        (func, self.load_args(), self.ret.load(Ordering::Relaxed))
    }

    fn store_args(&self, args: &Args) {
        for (word, value) in self.args.iter().zip(args) {
            word.store(*value, Ordering::Relaxed);
        }
    }

    fn load_args(&self) -> Args {
        let mut args: Args = [0; ARG_WORDS];
        for (value, word) in args.iter_mut().zip(&self.args) {
            *value = word.load(Ordering::Relaxed);
        }
        args
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::new()
    }
}

/// Both call slots.
#[derive(Debug, Default)]
pub struct Mailbox {
    to_cm4: Slot,
    to_cm7: Slot,
}

impl Mailbox {
    /// Empty mailbox.
    pub const fn new() -> Self {
        Self {
            to_cm4: Slot::new(),
            to_cm7: Slot::new(),
        }
    }

    /// Slot executed by `target`.
    pub fn slot(&self, target: CoreId) -> &Slot {
        match target {
            CoreId::Cm7 => &self.to_cm7,
            CoreId::Cm4 => &self.to_cm4,
        }
    }

    /// Run `f(args)` on `target` and return its result. The words are
    /// copied into the slot; `f` reads the target's own copy.
    ///
    /// # Safety
    ///
    /// `f` must be sound to call with `args` from `target`.
    pub unsafe fn call(
        &self,
        ops: &(impl CoreOps + ?Sized),
        target: CoreId,
        f: Entry,
        args: &Args,
    ) -> i32 {
        if ops.current_core() == target {
            // SAFETY: upheld by the caller.
            return unsafe { f(args) };
        }

        let slot = self.slot(target);
        let token = critical::enter(ops);
        slot.store_args(args);
        slot.func.store(f as usize, Ordering::Release);
        ops.send_event();
        while slot.is_pending() {
            core::hint::spin_loop();
        }
        let ret = slot.ret.load(Ordering::Acquire);
        critical::exit(ops, token);
        ret
    }

    /// Execute the pending call addressed to `this_core`, if any. This is
    /// the body of the send-event interrupt handler. Returns `true` when a
    /// call ran.
    pub fn service(&self, this_core: CoreId) -> bool {
        let slot = self.slot(this_core);
        let func = slot.func.load(Ordering::Acquire);
        if func == 0 {
            return false;
        }
        let args = slot.load_args();
        // SAFETY: only `call` stores a non-zero word here, and it stores an
        // `Entry` whose caller vouched for the argument words.
        let entry = unsafe { core::mem::transmute::<usize, Entry>(func) };
        // SAFETY: as above.
        let ret = unsafe { entry(&args) };
        slot.ret.store(ret, Ordering::Relaxed);
        slot.func.store(0, Ordering::Release);
        true
    }
}

/// Give the send-event interrupt serviced by `core` the most urgent priority
/// and enable it. Run on `core`.
pub fn init(bus: &impl Mmio, core: CoreId) -> Result<()> {
    let irq = core.sev_irq();
    nvic::set_priority(bus, irq, nvic::PRIORITY_HIGHEST)?;
    nvic::enable(bus, irq)?;
    info!("rpc: {} servicing irq {}", core, irq);
    Ok(())
}

/// Define a function whose body always executes on the named core.
///
/// The argument is taken by value and must implement [`MailboxArg`] and fit
/// [`ARG_BYTES`]. The generated function takes the mailbox and the caller's
/// [`CoreOps`] ahead of it:
///
/// ```
/// use platform::core_pinned;
///
/// core_pinned! {
///     /// Increment on the application core.
///     pub fn increment(arg: i32) -> i32 on Cm7 {
///         arg + 1
///     }
/// }
/// ```
#[macro_export]
macro_rules! core_pinned {
    (
        $(#[$meta:meta])*
        $vis:vis fn $name:ident($arg:ident: $ty:ty) -> i32 on $core:ident $body:block
    ) => {
        $(#[$meta])*
        $vis fn $name(
            mailbox: &$crate::rpc::Mailbox,
            ops: &(impl $crate::rpc::CoreOps + ?Sized),
            $arg: $ty,
        ) -> i32 {
            const _: () = ::core::assert!(
                ::core::mem::size_of::<$ty>() <= $crate::rpc::ARG_BYTES,
                "argument does not fit the mailbox slot"
            );

            fn body($arg: $ty) -> i32 $body

            unsafe fn entry(args: &$crate::rpc::Args) -> i32 {
                // SAFETY: `args` was packed from a `$ty` below.
                body(unsafe { $crate::rpc::unpack::<$ty>(args) })
            }

            let args = $crate::rpc::pack::<$ty>($arg);
            // SAFETY: `entry` unpacks the type that was packed.
            unsafe { mailbox.call(ops, $crate::rpc::CoreId::$core, entry, &args) }
        }
    };
}

/// Host model of both cores.
#[cfg(any(test, feature = "simulator"))]
pub mod sim {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::{CoreId, CoreOps};
    use crate::critical::{InterruptControl, SimInterrupts};

    /// One simulated core: fixed identity, software interrupt mask and a
    /// count of send-event instructions.
    #[derive(Debug)]
    pub struct SimCoreOps {
        core: CoreId,
        irq: SimInterrupts,
        events: AtomicU32,
    }

    impl SimCoreOps {
        /// Model of `core`.
        pub const fn new(core: CoreId) -> Self {
            Self {
                core,
                irq: SimInterrupts::new(),
                events: AtomicU32::new(0),
            }
        }

        /// Send-event instructions issued.
        pub fn events(&self) -> u32 {
            self.events.load(Ordering::SeqCst)
        }
    }

    impl InterruptControl for SimCoreOps {
        fn interrupts_enabled(&self) -> bool {
            self.irq.interrupts_enabled()
        }

        fn disable_interrupts(&self) {
            self.irq.disable_interrupts();
        }

        fn enable_interrupts(&self) {
            self.irq.enable_interrupts();
        }
    }

    impl CoreOps for SimCoreOps {
        fn current_core(&self) -> CoreId {
            self.core
        }

        fn send_event(&self) {
            self.events.fetch_add(1, Ordering::SeqCst);
        }
    }
}
