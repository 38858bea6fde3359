pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubClassifierBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractClassifierBackend;
