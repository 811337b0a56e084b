pub mod duplicate;
pub mod extraction;
pub mod quality;
