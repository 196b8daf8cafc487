//! hashcat 检查点（`.restore`）文件的编解码与设备参数改写

pub mod codec;
pub mod device_args;

pub use codec::{RestoreData, HEADER_LEN, RESTORE_STRUCT_SIZE};
pub use device_args::rewrite_device_args;
