pub mod build;
pub mod gecko;
