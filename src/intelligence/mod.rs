//! Fingerprinting: service identity for open ports and OS family guesses

pub mod os_fingerprinting;
pub mod service_detection;

pub use os_fingerprinting::{classify, Confidence, GuessSource, OsFamily, OsFingerprintGuess, OsFingerprinter};
pub use service_detection::{Provenance, ServiceFingerprinter, ServiceGuess};
