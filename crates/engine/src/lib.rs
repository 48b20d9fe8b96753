pub mod checkpoint;
pub mod coordinator;
pub mod cycle;
pub mod renderer;

pub use checkpoint::{
    AnyCheckpointStore, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
    RedisCheckpointStore,
};
pub use coordinator::{DeliveryCoordinator, DeliveryOutcome, DeliveryReport};
pub use cycle::{CycleSummary, ProjectCycle};
pub use renderer::Renderer;
