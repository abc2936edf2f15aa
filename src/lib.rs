pub mod rpc;
pub mod spaced_repetition;
