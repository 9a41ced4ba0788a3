#[cfg(target_arch = "x86")]
pub mod ata;
#[cfg(target_arch = "x86")]
pub mod serial;
