use crate::{NalUnit, NalUnitType, ParameterSet};

/// Latest SPS/PPS seen in-band or injected, plus the pair the active session
/// was last configured with.
#[derive(Debug, Clone, Default)]
pub struct ParameterSetStore {
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    configured: Option<ParameterSet>,
}

impl ParameterSetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an SPS or PPS unit. Returns whether the unit was a parameter set.
    pub fn observe(&mut self, nal: &NalUnit) -> bool {
        match nal.nal_type {
            NalUnitType::Sps => self.sps = Some(nal.payload.clone()),
            NalUnitType::Pps => self.pps = Some(nal.payload.clone()),
            _ => return false,
        }
        true
    }

    pub fn set(&mut self, sps: Vec<u8>, pps: Vec<u8>) {
        self.sps = Some(sps);
        self.pps = Some(pps);
    }

    pub fn current(&self) -> Option<ParameterSet> {
        Some(ParameterSet {
            sps: self.sps.clone()?,
            pps: self.pps.clone()?,
        })
    }

    /// Hands out the current pair when it differs from the last configured one,
    /// and marks it configured.
    pub fn take_pending(&mut self) -> Option<ParameterSet> {
        let current = self.current()?;
        if self.configured.as_ref() == Some(&current) {
            return None;
        }
        self.configured = Some(current.clone());
        Some(current)
    }

    pub fn is_configured(&self) -> bool {
        self.configured.is_some()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nal(bytes: &[u8]) -> NalUnit {
        NalUnit::new(bytes.to_vec()).unwrap()
    }

    #[test]
    fn pending_requires_both_sps_and_pps() {
        let mut store = ParameterSetStore::new();
        assert!(store.observe(&nal(&[0x67, 0x42, 0x00, 0x1E])));
        assert!(store.take_pending().is_none());
        assert!(store.observe(&nal(&[0x68, 0xCE])));
        let params = store.take_pending().unwrap();
        assert_eq!(params.sps, vec![0x67, 0x42, 0x00, 0x1E]);
        assert_eq!(params.pps, vec![0x68, 0xCE]);
        assert!(store.is_configured());
    }

    #[test]
    fn identical_pair_is_not_pending_twice() {
        let mut store = ParameterSetStore::new();
        store.set(vec![0x67, 0x42], vec![0x68, 0xCE]);
        assert!(store.take_pending().is_some());
        store.observe(&nal(&[0x67, 0x42]));
        store.observe(&nal(&[0x68, 0xCE]));
        assert!(store.take_pending().is_none());

        store.observe(&nal(&[0x67, 0x64]));
        assert!(store.take_pending().is_some());
    }

    #[test]
    fn slices_are_not_recorded() {
        let mut store = ParameterSetStore::new();
        assert!(!store.observe(&nal(&[0x65, 0x88])));
        assert!(store.current().is_none());
    }

    #[test]
    fn clear_forgets_configured_pair() {
        let mut store = ParameterSetStore::new();
        store.set(vec![0x67, 0x42], vec![0x68, 0xCE]);
        assert!(store.take_pending().is_some());
        store.clear();
        assert!(store.current().is_none());
        store.set(vec![0x67, 0x42], vec![0x68, 0xCE]);
        assert!(store.take_pending().is_some());
    }
}
