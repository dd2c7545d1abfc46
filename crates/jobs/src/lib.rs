pub mod context;
pub mod dedupe;
pub mod normalize;
pub mod payload;
pub mod processor;
pub mod publish;
pub mod queue;

pub use dedupe::DeliveryCache;
pub use payload::{JobPayload, ReviewJob};
pub use processor::ReviewProcessor;
pub use queue::ReviewQueue;
