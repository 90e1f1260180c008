use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Half-open `[start, start + extent)`, saturating at the edge of `i32`.
fn within(value: i32, start: i32, extent: i32) -> bool {
    value >= start && value < start.saturating_add(extent)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub dx: i32,
    pub dy: i32,
}

impl Room {
    pub fn contains(&self, x: i32, y: i32) -> bool {
        within(x, self.x, self.dx) && within(y, self.y, self.dy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Furniture {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub dx: i32,
    pub dy: i32,
}

impl Furniture {
    pub fn covers(&self, x: i32, y: i32) -> bool {
        within(x, self.x, self.dx) && within(y, self.y, self.dy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub name: String,
    pub x: i32,
    pub y: i32,
    #[serde(default = "SpawnPoint::default_extent")]
    pub dx: i32,
    #[serde(default = "SpawnPoint::default_extent")]
    pub dy: i32,
}

impl SpawnPoint {
    const fn default_extent() -> i32 {
        1
    }

    /// Every cell covered by the spawn region, column-major.
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        let (x_end, y_end) = (self.x.saturating_add(self.dx), self.y.saturating_add(self.dy));
        (self.x..x_end).flat_map(move |x| (self.y..y_end).map(move |y| (x, y)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Floor {
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub furniture: Vec<Furniture>,
    #[serde(default)]
    pub spawns: Vec<SpawnPoint>,
}

impl Floor {
    /// Index of the room whose footprint covers the cell.
    pub fn room_at(&self, x: i32, y: i32) -> Option<usize> {
        self.rooms.iter().position(|room| room.contains(x, y))
    }

    pub fn is_blocked(&self, x: i32, y: i32) -> bool {
        self.furniture.iter().any(|furniture| furniture.covers(x, y))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseDef {
    pub name: String,
    #[serde(default)]
    pub floors: Vec<Floor>,
}

impl HouseDef {
    /// Gameplay only ever happens on the ground floor.
    pub fn ground(&self) -> Option<&Floor> {
        self.floors.first()
    }
}

/// Read-only lookup of level definitions by name.
pub trait HouseProvider: Send + Sync {
    fn house(&self, name: &str) -> Option<Arc<HouseDef>>;
    fn names(&self) -> Vec<String>;
}

#[derive(Debug, Default, Clone)]
pub struct HouseCatalog {
    houses: BTreeMap<String, Arc<HouseDef>>,
}

impl HouseCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, house: HouseDef) {
        self.houses.insert(house.name.clone(), Arc::new(house));
    }

    pub fn with_house(mut self, house: HouseDef) -> Self {
        self.insert(house);
        self
    }

    /// Loads every `*.json` file in `dir` as a [`HouseDef`].
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut catalog = Self::new();
        for entry in fs::read_dir(dir).with_context(|| format!("Scanning levels under {}", dir.display()))? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).with_context(|| format!("Reading level {}", path.display()))?;
            let house: HouseDef = serde_json::from_slice(&bytes)
                .with_context(|| format!("Parsing level {}", path.display()))?;
            if catalog.houses.contains_key(&house.name) {
                bail!("Duplicate level name '{}' in {}", house.name, path.display());
            }
            catalog.insert(house);
        }
        Ok(catalog)
    }
}

impl HouseProvider for HouseCatalog {
    fn house(&self, name: &str) -> Option<Arc<HouseDef>> {
        self.houses.get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        self.houses.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_floor() -> Floor {
        Floor {
            rooms: vec![
                Room { name: "hall".into(), x: 0, y: 0, dx: 4, dy: 4 },
                Room { name: "study".into(), x: 4, y: 0, dx: 3, dy: 2 },
            ],
            furniture: vec![Furniture { name: "desk".into(), x: 5, y: 0, dx: 2, dy: 1 }],
            spawns: vec![SpawnPoint { name: "start".into(), x: 1, y: 1, dx: 2, dy: 2 }],
        }
    }

    #[test]
    fn room_at_respects_exclusive_bounds() {
        let floor = sample_floor();
        assert_eq!(floor.room_at(0, 0), Some(0));
        assert_eq!(floor.room_at(3, 3), Some(0));
        assert_eq!(floor.room_at(4, 1), Some(1));
        assert_eq!(floor.room_at(4, 2), None);
        assert_eq!(floor.room_at(-1, 0), None);
        assert!(floor.is_blocked(6, 0));
        assert!(!floor.is_blocked(6, 1));
    }

    #[test]
    fn spawn_cells_cover_region() {
        let floor = sample_floor();
        let cells: Vec<_> = floor.spawns[0].cells().collect();
        assert_eq!(cells, vec![(1, 1), (1, 2), (2, 1), (2, 2)]);
    }

    #[test]
    fn extreme_extents_saturate_instead_of_overflowing() {
        let room = Room { name: "edge".into(), x: i32::MAX - 1, y: 0, dx: i32::MAX, dy: 1 };
        assert!(room.contains(i32::MAX - 1, 0));
        assert!(!room.contains(i32::MAX, 0), "the saturated bound is exclusive");
        let desk = Furniture { name: "desk".into(), x: 0, y: i32::MAX, dx: 1, dy: 5 };
        assert!(!desk.covers(0, i32::MAX));
        let spawn = SpawnPoint { name: "edge".into(), x: i32::MAX - 1, y: i32::MAX, dx: 4, dy: 4 };
        assert_eq!(spawn.cells().count(), 0);
        let spawn = SpawnPoint { name: "edge".into(), x: i32::MAX - 2, y: 7, dx: 9, dy: 1 };
        assert_eq!(spawn.cells().collect::<Vec<_>>(), vec![(i32::MAX - 2, 7), (i32::MAX - 1, 7)]);
    }

    #[test]
    fn load_dir_reads_json_levels() {
        let dir = tempfile::tempdir().expect("temp dir");
        let house = HouseDef { name: "manor".into(), floors: vec![sample_floor()] };
        fs::write(dir.path().join("manor.json"), serde_json::to_vec(&house).expect("encode")).expect("write");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write");
        let catalog = HouseCatalog::load_dir(dir.path()).expect("load levels");
        assert_eq!(catalog.names(), vec!["manor".to_string()]);
        assert_eq!(catalog.house("manor").as_deref(), Some(&house));
        assert!(catalog.house("attic").is_none());
    }
}
