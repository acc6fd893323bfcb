//! Kernel Source Management Module
//!
//! Stages that act on the kernel tree inside the execution environment:
//! - `git`: clone-or-update of the kernel and patch repositories
//! - `kconfig`: defconfig reconciliation from feature flags and custom lines
//! - `patcher`: check-then-apply of the patch set, continuing past failures

pub mod git;
pub mod kconfig;
pub mod patcher;
