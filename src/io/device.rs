//! Multi-device dispatch: the [`crate::tree::BlockSource`] implementation
//! production code plugs into [`crate::tree::TreeReader`].

use std::collections::HashMap;

use crate::error::FsckError;
use crate::io::IoEngine;
use crate::tree::BlockSource;

/// One open device file per `devid`, opened read-only unless `repair` is
/// requested, in which case every device is opened read-write up front
/// (§5: "each is opened with the same exclusivity").
pub struct DeviceSet {
    engines: HashMap<u64, IoEngine>,
}

impl DeviceSet {
    pub fn new() -> Self {
        DeviceSet { engines: HashMap::new() }
    }

    pub fn open_device(&mut self, devid: u64, path: &str, writable: bool) -> Result<(), FsckError> {
        let engine = if writable { IoEngine::open_rw(path)? } else { IoEngine::open(path)? };
        self.engines.insert(devid, engine);
        Ok(())
    }

    pub fn device_size(&self, devid: u64) -> Option<u64> {
        self.engines.get(&devid).map(|e| e.device_size())
    }
}

impl Default for DeviceSet {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockSource for DeviceSet {
    fn read_physical(&mut self, devid: u64, physical: u64, len: usize) -> Result<Vec<u8>, FsckError> {
        let engine = self
            .engines
            .get_mut(&devid)
            .ok_or(FsckError::Corrupt("read from an unopened device"))?;
        Ok(engine.read_at(physical, len)?.to_vec())
    }

    fn write_physical(&mut self, devid: u64, physical: u64, buf: &[u8]) -> Result<(), FsckError> {
        let engine = self
            .engines
            .get_mut(&devid)
            .ok_or(FsckError::Corrupt("write to an unopened device"))?;
        engine.write_at(physical, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_from_unopened_device_is_corrupt_error() {
        let mut set = DeviceSet::new();
        assert!(matches!(set.read_physical(1, 0, 512), Err(FsckError::Corrupt(_))));
    }
}
