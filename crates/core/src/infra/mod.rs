pub mod clock;
pub mod metrics;
pub mod remote;
pub mod signer;
