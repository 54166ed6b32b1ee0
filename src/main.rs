//! # Work Index Demo Entry Point
//!
//! Runs the library's demo simulation: agents competing for the nearest
//! marked block. See `run_demo()` in the library.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=info cargo run --release
//! ```

fn main() {
    work_index::run_demo();
}
