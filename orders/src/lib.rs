//! SwapSettle Order Store
//!
//! Persistence port for exchange orders.
//!
//! - **`OrderStore`**: the storage interface (port)
//! - **`MemoryOrderStore`**: in-memory implementation for tests and the simulator
//! - **`TimedOrderStore`**: decorator bounding every call with a deadline
//! - **`PgOrderStore`**: PostgreSQL implementation (feature `postgres`)

mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;
mod timeout;

pub use memory::MemoryOrderStore;
#[cfg(feature = "postgres")]
pub use postgres::PgOrderStore;
pub use repository::{sort_fifo, OrderStore};
pub use timeout::TimedOrderStore;
