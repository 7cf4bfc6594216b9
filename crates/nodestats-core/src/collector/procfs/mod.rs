//! Readers for the Linux `/proc` counter files.

pub mod cpu;
pub mod parser;
mod probe;

pub use cpu::CpuSampler;
pub use probe::ProcfsProbe;
