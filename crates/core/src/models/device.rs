use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// 主机内唯一的设备编号
pub type DeviceId = u32;

/// 设备类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Gpu,
    Accelerator,
}

impl DeviceKind {
    /// OpenCL 设备类型编号，加速卡不参与 `--opencl-device-types`
    pub fn opencl_type(self) -> Option<u32> {
        match self {
            DeviceKind::Cpu => Some(1),
            DeviceKind::Gpu => Some(2),
            DeviceKind::Accelerator => None,
        }
    }
}

/// 计算设备
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub kind: DeviceKind,
    #[serde(default)]
    pub is_busy: bool,
}

/// 主机设备表，仅在本主机上是权威的
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct DeviceMap(BTreeMap<DeviceId, Device>);

impl DeviceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, device: Device) {
        self.0.insert(device.id, device);
    }

    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.0.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 是否还有空闲设备
    pub fn has_free_devices(&self) -> bool {
        self.0.values().any(|d| !d.is_busy)
    }

    /// 当前被占用的设备编号
    pub fn busy_devices(&self) -> Vec<DeviceId> {
        self.0
            .values()
            .filter(|d| d.is_busy)
            .map(|d| d.id)
            .collect()
    }

    /// 按编号顺序挑选最多 `limit` 个指定类型的空闲设备
    pub fn pick_free_devices(&self, kind: DeviceKind, limit: usize) -> Vec<DeviceId> {
        self.0
            .values()
            .filter(|d| d.kind == kind && !d.is_busy)
            .take(limit)
            .map(|d| d.id)
            .collect()
    }

    /// 所有给定设备都存在且空闲
    pub fn all_free(&self, ids: &[DeviceId]) -> bool {
        ids.iter()
            .all(|id| self.0.get(id).is_some_and(|d| !d.is_busy))
    }

    pub fn mark_busy(&mut self, ids: &[DeviceId]) {
        self.set_busy(ids, true);
    }

    pub fn mark_free(&mut self, ids: &[DeviceId]) {
        self.set_busy(ids, false);
    }

    fn set_busy(&mut self, ids: &[DeviceId], busy: bool) {
        for id in ids {
            if let Some(device) = self.0.get_mut(id) {
                device.is_busy = busy;
            }
        }
    }
}

impl FromIterator<Device> for DeviceMap {
    fn from_iter<I: IntoIterator<Item = Device>>(iter: I) -> Self {
        Self(iter.into_iter().map(|d| (d.id, d)).collect())
    }
}

/// 两个设备集合是否有交集，与元素顺序无关
pub fn devices_overlap(a: &[DeviceId], b: &[DeviceId]) -> bool {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let lookup: HashSet<DeviceId> = large.iter().copied().collect();
    small.iter().any(|id| lookup.contains(id))
}

/// 把设备编号列表格式化为 `1,2,3`
pub fn join_device_ids(ids: &[DeviceId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// 解析 `1,2,3` 形式的设备编号列表
pub fn parse_device_ids(input: &str) -> Result<Vec<DeviceId>, std::num::ParseIntError> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> DeviceMap {
        [
            Device { id: 1, name: "cpu0".into(), kind: DeviceKind::Cpu, is_busy: false },
            Device { id: 2, name: "gpu0".into(), kind: DeviceKind::Gpu, is_busy: false },
            Device { id: 3, name: "gpu1".into(), kind: DeviceKind::Gpu, is_busy: true },
            Device { id: 4, name: "gpu2".into(), kind: DeviceKind::Gpu, is_busy: false },
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_overlap_is_order_independent() {
        assert!(devices_overlap(&[5, 4], &[4]));
        assert!(devices_overlap(&[9, 1, 7], &[3, 7]));
        assert!(!devices_overlap(&[1, 2], &[4, 5]));
        assert!(!devices_overlap(&[], &[1]));
        // 未排序且部分重叠
        assert!(devices_overlap(&[8, 2, 6], &[6, 10, 1]));
    }

    #[test]
    fn test_pick_free_devices_respects_limit_and_busy() {
        let map = sample_map();
        assert_eq!(map.pick_free_devices(DeviceKind::Gpu, 4), vec![2, 4]);
        assert_eq!(map.pick_free_devices(DeviceKind::Gpu, 1), vec![2]);
        assert_eq!(map.pick_free_devices(DeviceKind::Cpu, 2), vec![1]);
    }

    #[test]
    fn test_mark_busy_and_free() {
        let mut map = sample_map();
        map.mark_busy(&[1, 2, 4]);
        assert!(!map.has_free_devices());
        map.mark_free(&[2]);
        assert!(map.all_free(&[2]));
        assert!(!map.all_free(&[2, 4]));
        assert!(!map.all_free(&[42]));
    }

    #[test]
    fn test_device_id_list_parsing() {
        assert_eq!(parse_device_ids("1, 2,3").unwrap(), vec![1, 2, 3]);
        assert!(parse_device_ids("").unwrap().is_empty());
        assert!(parse_device_ids("1,x").is_err());
        assert_eq!(join_device_ids(&[4, 5]), "4,5");
    }
}
