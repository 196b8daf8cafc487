pub mod checkpoint;
pub mod child;
pub mod components;
pub mod engines;

pub use child::{run_child, TaskRunner, TaskRunnerSettings};
pub use components::{
    BeaconManager, ChildCommand, DeviceAllocator, ProcessSupervisor, RpcClient, ServerApi,
    WorkerLifecycle,
};
pub use engines::{Engine, EngineContext, EngineOutcome, EngineRegistry, EngineStatus};
