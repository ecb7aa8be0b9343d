pub mod crop;
pub mod filters;
pub mod resize;
pub mod shapes;
pub mod text;
pub mod transform;
