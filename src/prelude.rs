//! Common imports and types used throughout madrona.

pub use crate::core::compositor::{Compositor, CompositorEvent, CompositorOptions};
pub use crate::core::errors::{CoreError, Result};
pub use crate::core::output::{Output, OutputInformation, OutputMode};
pub use crate::util::geometry::{Geometry, Point, Size};
