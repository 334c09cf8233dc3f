//! Application layer.
//!
//! - **`display_server`** – the [`DisplayServer`](display_server::DisplayServer)
//!   trait every backend implements, plus the scoped server grab.
//! - **`fault_trap`** – scoped capture of the display server's asynchronous
//!   error reports into an explicit bitmask.
//! - **`engine`** – [`TimingEngine`](engine::TimingEngine), its managed output,
//!   baseline and error taxonomy.
//! - **`discovery`**, **`mode_lifecycle`**, **`set_timing`**, **`enumerate`** –
//!   the engine's operations, one `impl` block per file.
//!
//! **Dependency rule**: nothing in here names a concrete backend.

pub mod discovery;
pub mod display_server;
pub mod engine;
pub mod enumerate;
pub mod fault_trap;
pub mod mode_lifecycle;
pub mod set_timing;
