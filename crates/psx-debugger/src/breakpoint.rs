use r3000_core::Signal;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    address: u32,
    enabled: bool,
    hits: u32,
    /// Lets execution resume from the breakpoint it just stopped at.
    skip_once: bool,
}

impl Breakpoint {
    const fn new(address: u32) -> Self {
        Self {
            address,
            enabled: true,
            hits: 0,
            skip_once: false,
        }
    }

    pub const fn address(&self) -> u32 {
        self.address
    }

    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub const fn hits(&self) -> u32 {
        self.hits
    }

    pub const fn skips_once(&self) -> bool {
        self.skip_once
    }
}

/// Software breakpoints, keyed by address.
#[derive(Debug, Default)]
pub struct BreakpointList {
    entries: BTreeMap<u32, Breakpoint>,
}

impl BreakpointList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an enabled breakpoint. Returns false if one already existed, which is enabled again.
    pub fn set(&mut self, address: u32) -> bool {
        if let Some(existing) = self.entries.get_mut(&address) {
            existing.enabled = true;
            return false;
        }
        self.entries.insert(address, Breakpoint::new(address));
        true
    }

    pub fn remove(&mut self, address: u32) -> Option<Breakpoint> {
        self.entries.remove(&address)
    }

    pub fn enable(&mut self, address: u32) -> bool {
        self.set_enabled(address, true)
    }

    pub fn disable(&mut self, address: u32) -> bool {
        self.set_enabled(address, false)
    }

    fn set_enabled(&mut self, address: u32, enabled: bool) -> bool {
        self.entries
            .get_mut(&address)
            .map(|bp| bp.enabled = enabled)
            .is_some()
    }

    pub fn get(&self, address: u32) -> Option<&Breakpoint> {
        self.entries.get(&address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_enabled(&self, address: u32) -> bool {
        self.entries.get(&address).is_some_and(|bp| bp.enabled)
    }

    /// Called right before the instruction at `address` executes. An armed skip-once lets it through
    /// a single time, otherwise the hit is counted and execution has to stop.
    pub fn hit(&mut self, address: u32) -> Result<(), Signal> {
        let Some(bp) = self.entries.get_mut(&address).filter(|bp| bp.enabled) else {
            return Ok(());
        };

        if bp.skip_once {
            bp.skip_once = false;
            return Ok(());
        }
        bp.hits += 1;
        Err(Signal::Breakpoint { address })
    }

    pub fn reset_hits(&mut self) {
        for bp in self.entries.values_mut() {
            bp.hits = 0;
        }
    }

    pub(crate) fn set_skip_once(&mut self, address: u32, skip: bool) {
        if let Some(bp) = self.entries.get_mut(&address) {
            bp.skip_once = skip;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hits_are_counted() {
        let mut list = BreakpointList::new();
        assert!(list.set(0x100));
        assert!(!list.set(0x100));
        assert_eq!(list.len(), 1);

        assert_eq!(list.hit(0x100), Err(Signal::Breakpoint { address: 0x100 }));
        assert_eq!(list.hit(0x100), Err(Signal::Breakpoint { address: 0x100 }));
        assert_eq!(list.hit(0x104), Ok(()));
        assert_eq!(list.get(0x100).map(Breakpoint::hits), Some(2));

        list.reset_hits();
        assert_eq!(list.get(0x100).map(Breakpoint::hits), Some(0));
    }

    #[test]
    fn disabled_breakpoints_do_not_fire() {
        let mut list = BreakpointList::new();
        list.set(0x100);
        assert!(list.disable(0x100));
        assert!(!list.has_enabled(0x100));
        assert_eq!(list.hit(0x100), Ok(()));
        assert_eq!(list.get(0x100).map(Breakpoint::hits), Some(0));

        assert!(list.enable(0x100));
        assert!(list.has_enabled(0x100));
        assert!(!list.enable(0x200));
    }

    #[test]
    fn skip_once_lets_one_hit_through() {
        let mut list = BreakpointList::new();
        list.set(0x100);
        list.set_skip_once(0x100, true);
        assert_eq!(list.hit(0x100), Ok(()));
        assert!(!list.get(0x100).unwrap().skips_once());
        assert_eq!(list.hit(0x100), Err(Signal::Breakpoint { address: 0x100 }));
        assert_eq!(list.get(0x100).map(Breakpoint::hits), Some(1));
    }

    #[test]
    fn removal() {
        let mut list = BreakpointList::new();
        list.set(0x100);
        assert_eq!(list.remove(0x100).map(|bp| bp.address()), Some(0x100));
        assert!(list.remove(0x100).is_none());
        assert!(list.is_empty());
    }
}
