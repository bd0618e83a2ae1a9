//! Runtime adapters: dedicated scheduler threads and async replies.

pub mod thread;
#[cfg(feature = "tokio-runtime")]
pub mod tokio_reply;

pub use thread::SchedulerThread;
