//! x86_64 context switching (System V AMD64)
//!
//! Only callee-saved registers are kept; every switch is a plain function
//! call from the compiler's point of view.

use std::arch::naked_asm;

use super::EntryFn;

/// Saved callee-saved registers, offsets fixed for the asm below
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Registers {
    pub rsp: u64, // 0x00
    pub rip: u64, // 0x08
    pub rbx: u64, // 0x10
    pub rbp: u64, // 0x18
    pub r12: u64, // 0x20
    pub r13: u64, // 0x28
    pub r14: u64, // 0x30
    pub r15: u64, // 0x38
}

/// Prepare `regs` so that switching to it calls `entry(arg)` on the stack
/// ending at `stack_top`.
///
/// # Safety
///
/// `regs` must be valid for writes and `stack_top` must be the high end of
/// a mapped, writable stack.
#[inline]
pub unsafe fn init_context(regs: *mut Registers, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    // The trampoline is entered by `jmp`, so rsp must already be 16-byte
    // aligned for its `call` to leave the callee at rsp % 16 == 8.
    let sp = (stack_top as usize) & !0xF;

    let regs = &mut *regs;
    *regs = Registers::default();
    regs.rsp = sp as u64;
    regs.rip = fiber_trampoline as usize as u64;
    regs.r12 = entry as usize as u64;
    regs.r13 = arg as u64;
}

#[unsafe(naked)]
unsafe extern "C" fn fiber_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        // entry switches away for good; falling through is a bug
        "ud2",
    );
}

/// Save the current context into `save` and resume `load`
///
/// Returns when some other context switches back into `save`.
///
/// # Safety
///
/// Both pointers must be valid; `load` must hold a context produced by
/// `init_context` or by an earlier `switch_context`, whose stack is still
/// mapped.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_save: *mut Registers, _load: *const Registers) {
    naked_asm!(
        // save into RDI
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 2f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        // load from RSI
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "jmp rax",
        // resumed here
        "2:",
        "ret",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_layout() {
        assert_eq!(std::mem::size_of::<Registers>(), 0x40);
        assert_eq!(std::mem::offset_of!(Registers, rip), 0x08);
        assert_eq!(std::mem::offset_of!(Registers, r15), 0x38);
    }

    #[test]
    fn test_init_context_aligns_stack() {
        extern "C" fn entry(_: usize) {}
        let mut regs = Registers::default();
        let fake_top = 0x1000_0007usize as *mut u8;
        unsafe { init_context(&mut regs, fake_top, entry, 42) };
        assert_eq!(regs.rsp % 16, 0);
        assert_eq!(regs.r13, 42);
        assert_eq!(regs.r12, entry as usize as u64);
    }
}
