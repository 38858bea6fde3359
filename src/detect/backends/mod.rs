pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubDetectorBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractDetectorBackend;
