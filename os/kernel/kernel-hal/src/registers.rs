//! # Typed x86-64 Registers
//!
//! Bitfield models of the registers the kernel core touches. The models are
//! plain values; the load/store implementations using inline assembly only
//! exist on the bare-metal target. The simulated platform keeps one model
//! instance per simulated core instead.

mod cr4;
mod msr;
mod rflags;

pub use cr4::Cr4;
pub use msr::Msr;
pub use rflags::Rflags;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The register access might be privileged and require kernel mode (Ring 0),
    /// and the stored value must keep the processor in a consistent state.
    unsafe fn store_unsafe(self);
}

pub trait LoadRegister {
    /// Loads the register; allowed at any privilege level.
    fn load() -> Self;
}

impl<T> LoadRegisterUnsafe for T
where
    T: LoadRegister,
{
    #[inline]
    unsafe fn load_unsafe() -> Self {
        <Self as LoadRegister>::load()
    }
}
