mod middleware;
mod render;

pub use render::{HttpState, build_router};
