//! Interrupt-masking critical sections.
//!
//! A [`Token`] remembers whether interrupts were enabled when the section was
//! entered. [`exit`] re-enables only in that case, so nested sections leave
//! interrupts masked until the outermost one ends.
//!
//! Global driver state in this crate is protected with
//! `critical_section::Mutex`; this module exists for the places that need
//! the raw token discipline, such as the inter-core call path which must
//! keep interrupts masked across a spin.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// CPU-level interrupt mask.
pub trait InterruptControl {
    /// `true` when interrupts are currently enabled.
    fn interrupts_enabled(&self) -> bool;
    /// Mask interrupts.
    fn disable_interrupts(&self);
    /// Unmask interrupts.
    fn enable_interrupts(&self);
}

/// Proof of an entered critical section.
#[must_use = "a critical section must be exited with `exit`"]
#[derive(Debug)]
pub struct Token {
    was_enabled: bool,
}

impl Token {
    /// `true` if interrupts were enabled on entry.
    pub fn was_enabled(&self) -> bool {
        self.was_enabled
    }
}

/// Enter a critical section.
pub fn enter(ctl: &(impl InterruptControl + ?Sized)) -> Token {
    let was_enabled = ctl.interrupts_enabled();
    ctl.disable_interrupts();
    Token { was_enabled }
}

/// Leave a critical section, restoring the state captured by `token`.
pub fn exit(ctl: &(impl InterruptControl + ?Sized), token: Token) {
    if token.was_enabled {
        ctl.enable_interrupts();
    }
}

/// Run `f` with interrupts masked.
pub fn with<R>(ctl: &(impl InterruptControl + ?Sized), f: impl FnOnce() -> R) -> R {
    let token = enter(ctl);
    let result = f();
    exit(ctl, token);
    result
}

/// Software interrupt mask for host tests.
#[derive(Debug)]
pub struct SimInterrupts {
    enabled: AtomicBool,
    disables: AtomicU32,
}

impl SimInterrupts {
    /// Model with interrupts initially enabled.
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            disables: AtomicU32::new(0),
        }
    }

    /// How many times interrupts were masked.
    pub fn disable_count(&self) -> u32 {
        self.disables.load(Ordering::Relaxed)
    }
}

impl Default for SimInterrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptControl for SimInterrupts {
    fn interrupts_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn disable_interrupts(&self) {
        self.disables.fetch_add(1, Ordering::Relaxed);
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn enable_interrupts(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn nested_sections_restore_on_outermost_exit() {
        let irq = SimInterrupts::new();
        let outer = enter(&irq);
        let inner = enter(&irq);
        assert!(!inner.was_enabled());
        exit(&irq, inner);
        assert!(!irq.interrupts_enabled());
        exit(&irq, outer);
        assert!(irq.interrupts_enabled());
    }

    #[test]
    fn section_entered_masked_stays_masked() {
        let irq = SimInterrupts::new();
        irq.disable_interrupts();
        with(&irq, || {});
        assert!(!irq.interrupts_enabled());
    }

    #[test]
    fn with_returns_closure_value() {
        let irq = SimInterrupts::new();
        assert_eq!(with(&irq, || 7), 7);
        assert_eq!(irq.disable_count(), 1);
    }
}
