pub mod allocation;
pub mod governor;
pub mod meminfo;

pub use allocation::{AllocatedPixmap, AllocationFifo};
pub use governor::{bytes_to_free, max_text_pages, MemoryProfile};
pub use meminfo::{FixedMemory, MemoryProbe, SystemMemory};
