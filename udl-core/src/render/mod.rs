//! Damage rendering.
//!
//! | Module     | Purpose                                          |
//! |------------|--------------------------------------------------|
//! | `damage`   | Dirty rectangles and word alignment              |
//! | `renderer` | Per-line transfer decomposition, shadow elision  |
//! | `metrics`  | Atomic throughput counters and snapshots         |

pub mod damage;
pub mod metrics;
pub mod renderer;

pub use damage::{DirtyRegion, WORD_SIZE};
pub use metrics::{Metrics, MetricsSnapshot};
pub use renderer::{RenderStats, Renderer, ScreenGeometry};
