//! Opening wheel and sdist archives and reading the metadata inside them.

mod sdist;
mod wheel;

pub use sdist::{SDist, SDistError};
pub use wheel::{Wheel, WheelError};
