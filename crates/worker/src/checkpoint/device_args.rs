use std::collections::BTreeSet;

use hashfleet_core::models::{join_device_ids, DeviceId, DeviceMap};
use hashfleet_core::{HashfleetError, HashfleetResult};

use super::RestoreData;

const DEVICES_ARG: &str = "--opencl-devices";
const DEVICE_TYPES_ARG: &str = "--opencl-device-types";

fn arg_key(arg: &str) -> &str {
    arg.split_once('=').map_or(arg, |(key, _)| key)
}

/// 任务在不同的设备集合上恢复时，改写检查点中的设备参数
///
/// 已记录的 `--opencl-devices` 与 `devices` 作为集合比较（与顺序无关）。不同时把它改写为
/// 排序后的新设备列表，并根据本机设备表重新计算 `--opencl-device-types`（仅当该参数存在，
/// 且新设备中至少有一个已知类型）。其余参数保持不变。返回是否做了修改。
pub fn rewrite_device_args(
    restore: &mut RestoreData,
    devices: &[DeviceId],
    system_devices: &DeviceMap,
) -> HashfleetResult<bool> {
    let Some(devices_idx) = restore.args.iter().position(|a| arg_key(a) == DEVICES_ARG) else {
        return Ok(false);
    };
    let types_idx = restore
        .args
        .iter()
        .position(|a| arg_key(a) == DEVICE_TYPES_ARG);

    let (_, value) = restore.args[devices_idx].split_once('=').ok_or_else(|| {
        HashfleetError::Checkpoint(format!("{DEVICES_ARG} 参数格式错误: 缺少 '='"))
    })?;

    let recorded = value
        .split(',')
        .map(|id| {
            id.trim().parse::<DeviceId>().map_err(|e| {
                HashfleetError::Checkpoint(format!("{DEVICES_ARG} 中的设备编号 {id:?} 无效: {e}"))
            })
        })
        .collect::<HashfleetResult<BTreeSet<DeviceId>>>()?;
    let wanted: BTreeSet<DeviceId> = devices.iter().copied().collect();

    if recorded == wanted {
        return Ok(false);
    }

    let sorted: Vec<DeviceId> = wanted.into_iter().collect();
    restore.args[devices_idx] = format!("{DEVICES_ARG}={}", join_device_ids(&sorted));

    if let Some(idx) = types_idx {
        let mut types: Vec<u32> = Vec::new();
        for id in &sorted {
            let kind = system_devices.get(*id).and_then(|d| d.kind.opencl_type());
            if let Some(t) = kind {
                if !types.contains(&t) {
                    types.push(t);
                }
            }
        }
        if !types.is_empty() {
            let joined = types
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",");
            restore.args[idx] = format!("{DEVICE_TYPES_ARG}={joined}");
        }
    }

    Ok(true)
}
