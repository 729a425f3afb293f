//! Socket plumbing shared by the client and the emulated server.

mod writer;

pub use writer::{spawn_writer_task, WriterHandle};
