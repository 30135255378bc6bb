//! Static class/spec catalog.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Dps,
    Tank,
    Healer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WowClass {
    pub id: u32,
    /// Name used by SimulationCraft, e.g. `death_knight`.
    pub simc_name: &'static str,
    pub full_name: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WowSpec {
    pub id: u32,
    pub class: WowClass,
    pub simc_name: &'static str,
    pub full_name: &'static str,
    pub role: Role,
}

impl WowSpec {
    /// `class_spec`, e.g. `shaman_elemental`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}_{}", self.class.simc_name, self.simc_name)
    }
}

impl std::fmt::Display for WowSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.full_name, self.class.full_name)
    }
}

const fn class(id: u32, simc_name: &'static str, full_name: &'static str) -> WowClass {
    WowClass {
        id,
        simc_name,
        full_name,
    }
}

const fn spec(
    id: u32,
    class: WowClass,
    simc_name: &'static str,
    full_name: &'static str,
    role: Role,
) -> WowSpec {
    WowSpec {
        id,
        class,
        simc_name,
        full_name,
        role,
    }
}

const WARRIOR: WowClass = class(1, "warrior", "Warrior");
const PALADIN: WowClass = class(2, "paladin", "Paladin");
const HUNTER: WowClass = class(3, "hunter", "Hunter");
const ROGUE: WowClass = class(4, "rogue", "Rogue");
const PRIEST: WowClass = class(5, "priest", "Priest");
const DEATH_KNIGHT: WowClass = class(6, "death_knight", "Death Knight");
const SHAMAN: WowClass = class(7, "shaman", "Shaman");
const MAGE: WowClass = class(8, "mage", "Mage");
const WARLOCK: WowClass = class(9, "warlock", "Warlock");
const MONK: WowClass = class(10, "monk", "Monk");
const DRUID: WowClass = class(11, "druid", "Druid");
const DEMON_HUNTER: WowClass = class(12, "demon_hunter", "Demon Hunter");

pub const WOW_SPECS: [WowSpec; 36] = [
    spec(71, WARRIOR, "arms", "Arms", Role::Dps),
    spec(72, WARRIOR, "fury", "Fury", Role::Dps),
    spec(73, WARRIOR, "protection", "Protection", Role::Tank),
    spec(65, PALADIN, "holy", "Holy", Role::Healer),
    spec(66, PALADIN, "protection", "Protection", Role::Tank),
    spec(70, PALADIN, "retribution", "Retribution", Role::Dps),
    spec(253, HUNTER, "beast_mastery", "Beast Mastery", Role::Dps),
    spec(254, HUNTER, "marksmanship", "Marksmanship", Role::Dps),
    spec(255, HUNTER, "survival", "Survival", Role::Dps),
    spec(259, ROGUE, "assassination", "Assassination", Role::Dps),
    spec(260, ROGUE, "outlaw", "Outlaw", Role::Dps),
    spec(261, ROGUE, "subtlety", "Subtlety", Role::Dps),
    spec(256, PRIEST, "discipline", "Discipline", Role::Healer),
    spec(257, PRIEST, "holy", "Holy", Role::Healer),
    spec(258, PRIEST, "shadow", "Shadow", Role::Dps),
    spec(250, DEATH_KNIGHT, "blood", "Blood", Role::Tank),
    spec(251, DEATH_KNIGHT, "frost", "Frost", Role::Dps),
    spec(252, DEATH_KNIGHT, "unholy", "Unholy", Role::Dps),
    spec(262, SHAMAN, "elemental", "Elemental", Role::Dps),
    spec(263, SHAMAN, "enhancement", "Enhancement", Role::Dps),
    spec(264, SHAMAN, "restoration", "Restoration", Role::Healer),
    spec(62, MAGE, "arcane", "Arcane", Role::Dps),
    spec(63, MAGE, "fire", "Fire", Role::Dps),
    spec(64, MAGE, "frost", "Frost", Role::Dps),
    spec(265, WARLOCK, "affliction", "Affliction", Role::Dps),
    spec(266, WARLOCK, "demonology", "Demonology", Role::Dps),
    spec(267, WARLOCK, "destruction", "Destruction", Role::Dps),
    spec(268, MONK, "brewmaster", "Brewmaster", Role::Tank),
    spec(269, MONK, "windwalker", "Windwalker", Role::Dps),
    spec(270, MONK, "mistweaver", "Mistweaver", Role::Healer),
    spec(102, DRUID, "balance", "Balance", Role::Dps),
    spec(103, DRUID, "feral", "Feral", Role::Dps),
    spec(104, DRUID, "guardian", "Guardian", Role::Tank),
    spec(105, DRUID, "restoration", "Restoration", Role::Healer),
    spec(577, DEMON_HUNTER, "havoc", "Havoc", Role::Dps),
    spec(581, DEMON_HUNTER, "vengeance", "Vengeance", Role::Tank),
];

/// Look up a spec by class and spec name.
///
/// Both simc names (`death_knight`) and display names (`Death Knight`) are
/// accepted.
#[must_use]
pub fn find_spec(class_name: &str, spec_name: &str) -> Option<WowSpec> {
    let class_token = crate::tokenizer::tokenize(class_name);
    let spec_token = crate::tokenizer::tokenize(spec_name);
    WOW_SPECS
        .iter()
        .find(|candidate| {
            candidate.class.simc_name == class_token && candidate.simc_name == spec_token
        })
        .copied()
}

/// Every damage spec, in catalog order.
#[must_use]
pub fn dps_specs() -> Vec<WowSpec> {
    WOW_SPECS
        .iter()
        .filter(|candidate| candidate.role == Role::Dps)
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_specs_by_display_or_simc_name() {
        let by_simc = find_spec("death_knight", "frost").unwrap();
        let by_display = find_spec("Death Knight", "Frost").unwrap();
        assert_eq!(by_simc, by_display);
        assert_eq!(by_simc.id, 251);
        assert_eq!(by_simc.class.id, 6);
        assert!(find_spec("mage", "teleport").is_none());
    }

    #[test]
    fn beast_mastery_tokenizes() {
        assert_eq!(find_spec("hunter", "Beast Mastery").unwrap().id, 253);
    }

    #[test]
    fn spec_ids_are_unique() {
        let mut ids: Vec<u32> = WOW_SPECS.iter().map(|s| s.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), WOW_SPECS.len());
    }

    #[test]
    fn dps_list_excludes_tanks_and_healers() {
        let specs = dps_specs();
        assert!(specs.iter().all(|s| s.role == Role::Dps));
        assert_eq!(specs.len(), 24);
    }
}
