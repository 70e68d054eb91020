pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

#[cfg(feature = "backend-face")]
pub mod face;

pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

#[cfg(feature = "backend-face")]
pub use face::FaceBackend;
