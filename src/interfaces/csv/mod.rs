//! CSV replay surface used by the binary.

pub mod command_reader;
pub mod payment_writer;
pub mod replay;
