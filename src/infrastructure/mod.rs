pub mod feedback;
pub mod logging;
pub mod scheduler;
pub mod simulator;
pub mod turntable;
