pub mod beacon_manager;
pub mod device_allocator;
pub mod process_supervisor;
pub mod rpc_client;
pub mod worker_lifecycle;

pub use beacon_manager::BeaconManager;
pub use device_allocator::DeviceAllocator;
pub use process_supervisor::{ChildCommand, ProcessSupervisor, TaskHandle};
pub use rpc_client::{FileStream, RemoteFile, RpcClient, ServerApi};
pub use worker_lifecycle::WorkerLifecycle;
