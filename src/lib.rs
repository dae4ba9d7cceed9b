// Library interface for the AEGIS DNSSEC rollover orchestrator
// Allows testing and reuse of the rollover engine outside the binary

pub mod rollover;
