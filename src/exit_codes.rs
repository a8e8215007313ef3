/// Process exit codes.
pub mod exit {
    /// Every operation reached a terminal, non-failed state.
    pub const SUCCESS: i32 = 0;
    /// At least one operation failed.
    pub const PARTIAL_FAILURE: i32 = 1;
    /// Configuration, plan or resume store unusable; nothing trustworthy was done.
    pub const RUN_FAILURE: i32 = 2;
    /// Interrupted; progress was saved for `picsort resume`.
    pub const CANCELLED: i32 = 130;
}
