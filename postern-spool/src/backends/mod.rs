mod file;
mod memory;
mod memory_queue;

pub use file::FileMailRepository;
pub use memory::MemoryMailRepository;
pub use memory_queue::{MemoryMailQueue, QueueStats};
pub use test::TestMailRepository;
