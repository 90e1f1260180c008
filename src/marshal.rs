//! Plain value records exchanged with scripts and the single conversion layer
//! to and from interpreter values. Scripts never hold live engine state, only
//! these snapshots and the integer handles inside them.

use glam::IVec2;
use rhai::{Dynamic, EvalAltResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::events::Action;
use crate::game::{Entity, EntityId};
use crate::house::SpawnPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl From<IVec2> for Point {
    fn from(v: IVec2) -> Self {
        Self { x: v.x, y: v.y }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub name: String,
    pub pos: Point,
    pub corpus: i32,
    pub ego: i32,
    pub hp_cur: i32,
    pub hp_max: i32,
    pub ap_cur: i32,
    pub ap_max: i32,
}

impl From<&Entity> for EntitySnapshot {
    fn from(ent: &Entity) -> Self {
        Self {
            id: ent.id,
            name: ent.name.clone(),
            pos: ent.pos.into(),
            corpus: ent.stats.corpus,
            ego: ent.stats.ego,
            hp_cur: ent.hp_cur,
            hp_max: ent.stats.hp_max,
            ap_cur: ent.ap_cur,
            ap_max: ent.stats.ap_max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnPointInfo {
    pub id: i64,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub dx: i32,
    pub dy: i32,
}

impl SpawnPointInfo {
    pub fn new(index: usize, sp: &SpawnPoint) -> Self {
        Self { id: index as i64, name: sp.name.clone(), x: sp.x, y: sp.y, dx: sp.dx, dy: sp.dy }
    }
}

/// Only the `id` field is read back when a script hands spawn points in.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SpawnPointRef {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSnapshot {
    pub name: String,
    pub actor: EntityId,
    pub target: Option<Point>,
}

impl From<&Action> for ActionSnapshot {
    fn from(action: &Action) -> Self {
        Self { name: action.name.clone(), actor: action.actor, target: action.target.map(Point::from) }
    }
}

pub fn to_script<T: Serialize + ?Sized>(value: &T) -> Result<Dynamic, Box<EvalAltResult>> {
    rhai::serde::to_dynamic(value)
}

pub fn from_script<T: DeserializeOwned>(value: &Dynamic) -> Result<T, Box<EvalAltResult>> {
    rhai::serde::from_dynamic(value)
}

/// Text form used by the diagnostic print operation.
pub fn stringify_param(value: &Dynamic) -> String {
    if value.is_map() || value.is_array() {
        return "table".to_string();
    }
    if let Ok(flag) = value.as_bool() {
        return if flag { "true" } else { "false" }.to_string();
    }
    if value.is_unit() {
        return "nil".to_string();
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Side, Stats};

    #[test]
    fn entity_snapshot_uses_script_field_names() {
        let ent = Entity {
            id: 7,
            name: "Teen".into(),
            pos: IVec2::new(3, 4),
            side: Side::Explorers,
            stats: Stats { corpus: 2, ego: 5, hp_max: 6, ap_max: 8 },
            actions: Vec::new(),
            hp_cur: 4,
            ap_cur: 1,
        };
        let value = to_script(&EntitySnapshot::from(&ent)).expect("marshal");
        let map = value.try_cast::<rhai::Map>().expect("map");
        assert_eq!(map["id"].as_int(), Ok(7));
        assert_eq!(map["hpCur"].as_int(), Ok(4));
        assert_eq!(map["apMax"].as_int(), Ok(8));
        let pos = map["pos"].clone().try_cast::<rhai::Map>().expect("pos map");
        assert_eq!(pos["x"].as_int(), Ok(3));
    }

    #[test]
    fn point_reads_back_from_script_map() {
        let mut map = rhai::Map::new();
        map.insert("x".into(), Dynamic::from(2_i64));
        map.insert("y".into(), Dynamic::from(-1_i64));
        let point: Point = from_script(&Dynamic::from(map)).expect("point");
        assert_eq!(point, Point { x: 2, y: -1 });
    }

    #[test]
    fn stringify_matches_print_conventions() {
        assert_eq!(stringify_param(&Dynamic::from(true)), "true");
        assert_eq!(stringify_param(&Dynamic::from(rhai::Map::new())), "table");
        assert_eq!(stringify_param(&Dynamic::from("boo".to_string())), "boo");
        assert_eq!(stringify_param(&Dynamic::from(3_i64)), "3");
    }
}
