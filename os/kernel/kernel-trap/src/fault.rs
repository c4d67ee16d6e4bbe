use bitfield_struct::bitfield;

/// Page-fault error code (Intel SDM Vol. 3A, §6.15, "#PF").
#[bitfield(u64)]
pub struct PageFaultError {
    /// 0 = non-present page, 1 = protection violation.
    pub present: bool,
    /// 0 = read or execute, 1 = write.
    pub write: bool,
    /// The access came from CPL 3.
    pub user: bool,
    /// Reserved bit set in a paging structure.
    pub reserved_bit: bool,
    pub instruction_fetch: bool,
    pub protection_key: bool,
    pub shadow_stack: bool,
    #[bits(57)]
    __: u64,
}

impl PageFaultError {
    #[must_use]
    pub const fn access(&self) -> &'static str {
        if self.write() { "WRITE" } else { "READ" }
    }

    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "non-present page"
        } else if self.instruction_fetch() {
            "instruction fetch from a protected page"
        } else if self.write() {
            "write to a protected page"
        } else {
            "read from a protected page"
        }
    }
}
