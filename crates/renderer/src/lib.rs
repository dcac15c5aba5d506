//! Renderer capability for the fraglive editing pipeline.
//!
//! The crate is the boundary between the control loop in `pipeline` and the
//! GPU. Each editing channel (the visual program and the optional sound
//! program) is served by one renderer handle:
//!
//! ```text
//!   pipeline / fraglive
//!          │ source text
//!          ▼
//!   RendererHandle::compile ──▶ wrap + naga validate ──▶ worker thread
//!          │                                             │ BuildReport
//!          │ render_frame / render_once                  ▼
//!          └──▶ OffscreenRenderer ──▶ wgpu pass ──▶ readback (capture only)
//! ```
//!
//! Handles are cheap to create against independent offscreen surfaces and
//! independent virtual clocks, which is what keeps export capture isolated
//! from the live view. Compilation never blocks the caller: a
//! [`CompileTicket`] delivers exactly one [`BuildReport`] per attempt, and a
//! broken build leaves the previous program running.

mod clock;
mod compile;
mod handle;
mod offscreen;
mod source;

pub use clock::{
    BoxedTimeSource, FixedTimeSource, SteppedTimeSource, SystemTimeSource, TimeSample, TimeSource,
};
pub use compile::compile_report;
pub use handle::{BuildReport, BuildStatus, CompileTicket, Frame, RendererHandle};
pub use offscreen::{OffscreenOptions, OffscreenRenderer};
pub use source::{uses_backbuffer, wrap_shader, ShaderKind};
