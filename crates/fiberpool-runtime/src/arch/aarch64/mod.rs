//! aarch64 context switching (AAPCS64)
//!
//! Saves x19-x28, the frame pointer, the link register, sp and the low
//! halves of v8-v15.

use std::arch::naked_asm;

use super::EntryFn;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Registers {
    pub sp: u64,            // 0
    pub x19_x28: [u64; 10], // 8
    pub fp: u64,            // 88
    pub lr: u64,            // 96
    pub d8_d15: [u64; 8],   // 104
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
    let regs = &mut *regs;
    *regs = Registers::default();
    regs.sp = ((stack_top as usize) & !0xF) as u64;
    regs.lr = fiber_trampoline as usize as u64;
    regs.x19_x28[0] = entry as usize as u64;
    regs.x19_x28[1] = arg as u64;
}

#[unsafe(naked)]
unsafe extern "C" fn fiber_trampoline() {
    naked_asm!(
        "mov x0, x20",
        "blr x19",
        "brk #0",
    );
}

/// Save the current context into `save` and resume `load`
///
/// # Safety
///
/// Same contract as the x86_64 backend.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_save: *mut Registers, _load: *const Registers) {
    naked_asm!(
        // save into x0
        "mov x9, sp",
        "str x9, [x0, #0]",
        "stp x19, x20, [x0, #8]",
        "stp x21, x22, [x0, #24]",
        "stp x23, x24, [x0, #40]",
        "stp x25, x26, [x0, #56]",
        "stp x27, x28, [x0, #72]",
        "stp x29, x30, [x0, #88]",
        "stp d8, d9, [x0, #104]",
        "stp d10, d11, [x0, #120]",
        "stp d12, d13, [x0, #136]",
        "stp d14, d15, [x0, #152]",
        // load from x1
        "ldr x9, [x1, #0]",
        "mov sp, x9",
        "ldp x19, x20, [x1, #8]",
        "ldp x21, x22, [x1, #24]",
        "ldp x23, x24, [x1, #40]",
        "ldp x25, x26, [x1, #56]",
        "ldp x27, x28, [x1, #72]",
        "ldp x29, x30, [x1, #88]",
        "ldp d8, d9, [x1, #104]",
        "ldp d10, d11, [x1, #120]",
        "ldp d12, d13, [x1, #136]",
        "ldp d14, d15, [x1, #152]",
        "ret",
    );
}
