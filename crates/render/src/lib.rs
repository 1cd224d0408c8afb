//! Backend-agnostic GPU interface for the grass culling pipeline.
//!
//! # Invariants
//! - Buffer contents only change through recorded commands, in call order.
//! - Append lists never store entries past their capacity.
//! - Record layouts here are the only source of truth for the WGSL kernels.
//!
//! [`HeadlessBackend`] executes the kernels on the CPU; `verdant-render-wgpu`
//! runs the same contract on a real device.

mod backend;
mod headless;
mod indirect;
pub mod kernels;
pub mod layout;

pub use backend::{BufferDesc, BufferHandle, BufferUsage, ComputeBackend, Dispatch, Kernel};
pub use headless::{BackendStats, HeadlessBackend};
pub use indirect::{IndirectArgs, Lod};
pub use layout::{DrawIndexedArgs, FrameParams};

pub fn crate_info() -> &'static str {
    "verdant-render v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("render"));
    }

    #[test]
    fn kernel_entry_points_are_distinct() {
        let names = [
            Kernel::ConvertInstances.entry_point(),
            Kernel::CullDivisions.entry_point(),
            Kernel::ResolveInstances.entry_point(),
        ];
        assert_ne!(names[0], names[1]);
        assert_ne!(names[1], names[2]);
    }
}
