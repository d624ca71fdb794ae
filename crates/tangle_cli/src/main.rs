//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `tangle_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

fn main() {
    println!("tangle_core ping={}", tangle_core::ping());
    println!("tangle_core version={}", tangle_core::core_version());
}
