//! VM configuration knobs, constructed from CLI flags by `seq-cli`.
//!
//! A small plain struct rather than a file-based config format, since
//! there's no manifest surface in this workspace to justify one.

/// Call-frame stack depth beyond which a `CALL` raises "stack overflow".
pub const DEFAULT_MAX_FRAMES: usize = 64;

/// Initial value-stack capacity; the stack grows past this as needed.
pub const DEFAULT_STACK_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub max_frames: usize,
    pub initial_stack_capacity: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_frames: DEFAULT_MAX_FRAMES,
            initial_stack_capacity: DEFAULT_STACK_CAPACITY,
        }
    }
}
