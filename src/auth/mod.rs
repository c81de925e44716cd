//! Caller authentication: token verification, the local identity mirror, ownership
//! checks, and the stage pipeline that strings them together.

pub mod guard;
pub mod pipeline;
pub mod resolver;
pub mod token;
