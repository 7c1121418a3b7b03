//! In-memory location index, loadable from a JSON reference file.

use std::collections::HashMap;

use ratewatch_core::Jurisdiction;

use crate::client::LocationIndex;

/// Static `LocationIndex` built from jurisdiction -> location -> grouping
/// reference data.
#[derive(Debug, Default, Clone)]
pub struct StaticLocationIndex {
    by_jurisdiction: HashMap<Jurisdiction, Vec<String>>,
    groupings: HashMap<String, String>,
}

impl StaticLocationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the on-disk reference format:
    /// `{"TX": {"75201": "DALLAS", "79901": "EL PASO"}}`.
    pub fn from_map(map: HashMap<String, HashMap<String, String>>) -> Self {
        let mut index = Self::new();
        for (jurisdiction, locations) in map {
            for (location, grouping) in locations {
                index.insert(&jurisdiction, location, grouping);
            }
        }
        index
    }

    pub fn insert(
        &mut self,
        jurisdiction: &str,
        location: impl Into<String>,
        grouping: impl Into<String>,
    ) {
        let location = location.into();
        self.by_jurisdiction
            .entry(Jurisdiction::new(jurisdiction))
            .or_default()
            .push(location.clone());
        self.groupings.insert(location, grouping.into());
    }
}

impl LocationIndex for StaticLocationIndex {
    fn list_locations(&self, jurisdiction: &Jurisdiction) -> Vec<String> {
        self.by_jurisdiction
            .get(jurisdiction)
            .cloned()
            .unwrap_or_default()
    }

    fn grouping_of(&self, location: &str) -> Option<String> {
        self.groupings.get(location).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_map_round_trip() {
        let mut tx = HashMap::new();
        tx.insert("75201".to_string(), "DALLAS".to_string());
        tx.insert("79901".to_string(), "EL PASO".to_string());
        let mut map = HashMap::new();
        map.insert("tx".to_string(), tx);

        let index = StaticLocationIndex::from_map(map);
        let mut locations = index.list_locations(&Jurisdiction::new("TX"));
        locations.sort();
        assert_eq!(locations, vec!["75201", "79901"]);
        assert_eq!(index.grouping_of("75201").as_deref(), Some("DALLAS"));
        assert_eq!(index.grouping_of("00000"), None);
    }

    #[test]
    fn unknown_jurisdiction_is_empty() {
        let index = StaticLocationIndex::new();
        assert!(index.list_locations(&Jurisdiction::new("AK")).is_empty());
    }
}
