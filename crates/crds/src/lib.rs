//! Kubevirt machine resource models
//!
//! Typed views of the resources the kubevirt machine controller reads and
//! writes: the tenant-cluster `Machine`, the infra-cluster `VirtualMachine`
//! and `VirtualMachineInstance`, and the versioned provider spec/status
//! blobs embedded in a machine.

pub mod machine;
pub mod provider;
pub mod virtual_machine;
pub mod virtual_machine_instance;

pub use machine::*;
pub use provider::*;
pub use virtual_machine::*;
pub use virtual_machine_instance::*;
